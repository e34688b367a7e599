use crate::level::SummaryLevel;

use super::{FieldFallback, FieldKind, SchemaDefinition, SchemaField};

const fn field(
    name: &'static str,
    kind: FieldKind,
    description: &'static str,
    fallback: FieldFallback,
) -> SchemaField {
    SchemaField {
        name,
        kind,
        description,
        fallback,
    }
}

const CHUNK_FIELDS: &[SchemaField] = &[
    field(
        "summary",
        FieldKind::Text,
        "Two or three sentences stating what was said in this excerpt",
        FieldFallback::Summary,
    ),
    field(
        "keyPoints",
        FieldKind::TextList,
        "Up to five concrete statements, facts or decisions from the excerpt",
        FieldFallback::KeySentences,
    ),
    field(
        "topics",
        FieldKind::TextList,
        "Short noun phrases naming the subjects discussed",
        FieldFallback::Keywords,
    ),
    field(
        "actionItems",
        FieldKind::TextList,
        "Tasks or commitments the speaker mentioned, empty if none",
        FieldFallback::Empty,
    ),
    field(
        "sentiment",
        FieldKind::Text,
        "One word describing the overall tone: positive, neutral or negative",
        FieldFallback::Empty,
    ),
];

const SESSION_FIELDS: &[SchemaField] = &[
    field(
        "title",
        FieldKind::Text,
        "A headline of at most eight words for the session",
        FieldFallback::Title,
    ),
    field(
        "summary",
        FieldKind::Text,
        "One paragraph describing what happened during the session",
        FieldFallback::Summary,
    ),
    field(
        "keyPoints",
        FieldKind::TextList,
        "The most important statements, facts or decisions of the session",
        FieldFallback::KeySentences,
    ),
    field(
        "topics",
        FieldKind::TextList,
        "Subjects covered during the session",
        FieldFallback::Keywords,
    ),
    field(
        "actionItems",
        FieldKind::TextList,
        "Tasks or follow-ups that came up, empty if none",
        FieldFallback::Empty,
    ),
    field(
        "people",
        FieldKind::TextList,
        "Names of people mentioned, empty if none",
        FieldFallback::Empty,
    ),
];

const DAY_FIELDS: &[SchemaField] = &[
    field(
        "title",
        FieldKind::Text,
        "A headline of at most eight words for the day",
        FieldFallback::Title,
    ),
    field(
        "summary",
        FieldKind::Text,
        "One paragraph telling the story of the day",
        FieldFallback::Summary,
    ),
    field(
        "highlights",
        FieldKind::TextList,
        "The notable moments of the day",
        FieldFallback::KeySentences,
    ),
    field(
        "topics",
        FieldKind::TextList,
        "Subjects that occupied the day",
        FieldFallback::Keywords,
    ),
    field(
        "actionItems",
        FieldKind::TextList,
        "Open tasks carried out of the day, empty if none",
        FieldFallback::Empty,
    ),
    field(
        "mood",
        FieldKind::Text,
        "One or two words describing the overall mood of the day",
        FieldFallback::Empty,
    ),
];

const WEEK_FIELDS: &[SchemaField] = &[
    field(
        "title",
        FieldKind::Text,
        "A headline of at most eight words for the week",
        FieldFallback::Title,
    ),
    field(
        "summary",
        FieldKind::Text,
        "One paragraph describing how the week went",
        FieldFallback::Summary,
    ),
    field(
        "themes",
        FieldKind::TextList,
        "Recurring subjects across the days of the week",
        FieldFallback::Keywords,
    ),
    field(
        "accomplishments",
        FieldKind::TextList,
        "Things that were finished or decided during the week",
        FieldFallback::KeySentences,
    ),
    field(
        "openThreads",
        FieldKind::TextList,
        "Unresolved questions or tasks going into next week",
        FieldFallback::Empty,
    ),
];

const MONTH_FIELDS: &[SchemaField] = &[
    field(
        "title",
        FieldKind::Text,
        "A headline of at most eight words for the month",
        FieldFallback::Title,
    ),
    field(
        "summary",
        FieldKind::Text,
        "One paragraph describing the month as a whole",
        FieldFallback::Summary,
    ),
    field(
        "themes",
        FieldKind::TextList,
        "Dominant subjects of the month",
        FieldFallback::Keywords,
    ),
    field(
        "milestones",
        FieldKind::TextList,
        "Significant events or achievements of the month",
        FieldFallback::KeySentences,
    ),
    field(
        "patterns",
        FieldKind::TextList,
        "Habits or tendencies visible across the weeks",
        FieldFallback::Empty,
    ),
];

const YEAR_FIELDS: &[SchemaField] = &[
    field(
        "title",
        FieldKind::Text,
        "A headline of at most eight words for the year",
        FieldFallback::Title,
    ),
    field(
        "summary",
        FieldKind::Text,
        "Two paragraphs reviewing the year",
        FieldFallback::Summary,
    ),
    field(
        "themes",
        FieldKind::TextList,
        "The defining subjects of the year",
        FieldFallback::Keywords,
    ),
    field(
        "milestones",
        FieldKind::TextList,
        "The most significant events of the year, in order",
        FieldFallback::KeySentences,
    ),
    field(
        "growth",
        FieldKind::Text,
        "One or two sentences on how things changed from start to end of the year",
        FieldFallback::Empty,
    ),
];

const YEAR_ROLLUP_FIELDS: &[SchemaField] = &[
    field(
        "title",
        FieldKind::Text,
        "A headline of at most eight words for the whole span",
        FieldFallback::Title,
    ),
    field(
        "summary",
        FieldKind::Text,
        "Two paragraphs reviewing the years covered",
        FieldFallback::Summary,
    ),
    field(
        "eras",
        FieldKind::TextList,
        "Distinct periods, each named with its years",
        FieldFallback::KeySentences,
    ),
    field(
        "recurringThemes",
        FieldKind::TextList,
        "Subjects that keep returning year after year",
        FieldFallback::Keywords,
    ),
    field(
        "longTermTrends",
        FieldKind::TextList,
        "Directions of change visible only across several years",
        FieldFallback::Empty,
    ),
];

pub(super) static CHUNK: SchemaDefinition = SchemaDefinition {
    level: SummaryLevel::Chunk,
    fields: CHUNK_FIELDS,
};

pub(super) static SESSION: SchemaDefinition = SchemaDefinition {
    level: SummaryLevel::Session,
    fields: SESSION_FIELDS,
};

pub(super) static DAY: SchemaDefinition = SchemaDefinition {
    level: SummaryLevel::Day,
    fields: DAY_FIELDS,
};

pub(super) static WEEK: SchemaDefinition = SchemaDefinition {
    level: SummaryLevel::Week,
    fields: WEEK_FIELDS,
};

pub(super) static MONTH: SchemaDefinition = SchemaDefinition {
    level: SummaryLevel::Month,
    fields: MONTH_FIELDS,
};

pub(super) static YEAR: SchemaDefinition = SchemaDefinition {
    level: SummaryLevel::Year,
    fields: YEAR_FIELDS,
};

pub(super) static YEAR_ROLLUP: SchemaDefinition = SchemaDefinition {
    level: SummaryLevel::YearRollup,
    fields: YEAR_ROLLUP_FIELDS,
};

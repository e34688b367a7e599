mod schemas;

use std::fmt::Write as _;

use crate::level::SummaryLevel;

/// JSON type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    TextList,
    Number,
}

impl FieldKind {
    const fn json_type(self) -> &'static str {
        match self {
            Self::Text => "string",
            Self::TextList => "array of strings",
            Self::Number => "number",
        }
    }
}

/// Which extractive heuristic fills a field when model output is unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFallback {
    Summary,
    Title,
    KeySentences,
    Keywords,
    Empty,
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
    pub fallback: FieldFallback,
}

/// The fixed, ordered field list for one summary level.
#[derive(Debug)]
pub struct SchemaDefinition {
    pub level: SummaryLevel,
    pub fields: &'static [SchemaField],
}

impl SchemaDefinition {
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// System/user message pair ready for any chat-style backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessages {
    pub system: String,
    pub user: String,
}

#[must_use]
pub fn schema(level: SummaryLevel) -> &'static SchemaDefinition {
    match level {
        SummaryLevel::Chunk => &schemas::CHUNK,
        SummaryLevel::Session => &schemas::SESSION,
        SummaryLevel::Day => &schemas::DAY,
        SummaryLevel::Week => &schemas::WEEK,
        SummaryLevel::Month => &schemas::MONTH,
        SummaryLevel::Year => &schemas::YEAR,
        SummaryLevel::YearRollup => &schemas::YEAR_ROLLUP,
    }
}

const SYSTEM_PROMPT: &str = "You summarize personal voice transcripts. \
    You answer with a single JSON object and nothing else. \
    You never invent facts that are not in the input.";

/// Build the system/user messages asking for a `level` summary of `input`.
#[must_use]
pub fn build_messages(
    level: SummaryLevel,
    input: &str,
    metadata: &[(String, String)],
) -> PromptMessages {
    let schema = schema(level);
    let mut user = String::new();

    let _ = writeln!(
        user,
        "Summarize the input below at the {level} level ({}).",
        level.describe()
    );
    let _ = writeln!(
        user,
        "Return a JSON object with exactly these keys. Do not add any other key and do not omit any key:"
    );
    for field in schema.fields {
        let _ = writeln!(
            user,
            "- \"{}\" ({}): {}",
            field.name,
            field.kind.json_type(),
            field.description
        );
    }

    if !metadata.is_empty() {
        user.push_str("\nContext:\n");
        for (key, value) in metadata {
            let _ = writeln!(user, "{key}: {value}");
        }
    }

    user.push_str("\nInput:\n<<<\n");
    user.push_str(input);
    if !input.ends_with('\n') {
        user.push('\n');
    }
    user.push_str(">>>\n\n");

    let keys: Vec<String> = schema.field_names().map(|n| format!("\"{n}\"")).collect();
    let _ = write!(
        user,
        "Formatting rules: output raw JSON only with the keys {}. \
         Do not wrap the answer in markdown or code fences. \
         The response must start with {{ and end with }}.",
        keys.join(", ")
    );

    PromptMessages {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_level_has_its_own_schema_with_summary() {
        for level in SummaryLevel::ALL {
            let schema = schema(level);
            assert_eq!(schema.level, level);
            assert!(
                schema.field("summary").is_some(),
                "{level} schema lacks a summary field"
            );
            let names: Vec<&str> = schema.field_names().collect();
            let mut deduped = names.clone();
            deduped.sort_unstable();
            deduped.dedup();
            assert_eq!(names.len(), deduped.len(), "{level} has duplicate fields");
        }
    }

    #[test]
    fn user_message_contains_every_field_name() {
        for level in SummaryLevel::ALL {
            let messages = build_messages(level, "we talked about the garden", &[]);
            for name in schema(level).field_names() {
                assert!(
                    messages.user.contains(&format!("\"{name}\"")),
                    "{level} prompt is missing {name}"
                );
            }
        }
    }

    #[test]
    fn user_message_names_level_and_embeds_input_verbatim() {
        let input = "  First line.\n\tSecond   line with {braces}  ";
        let messages = build_messages(SummaryLevel::Week, input, &[]);
        assert!(messages.user.contains("week level"));
        assert!(messages.user.contains(input));
        assert!(messages.user.contains("Do not add any other key"));
    }

    #[test]
    fn metadata_is_rendered_as_key_value_lines() {
        let metadata = vec![
            ("date".to_string(), "2026-10-18".to_string()),
            ("speaker".to_string(), "me".to_string()),
        ];
        let messages = build_messages(SummaryLevel::Session, "text", &metadata);
        assert!(messages.user.contains("date: 2026-10-18\n"));
        assert!(messages.user.contains("speaker: me\n"));
    }

    #[test]
    fn user_message_ends_with_formatting_constraints() {
        let messages = build_messages(SummaryLevel::Day, "text", &[]);
        assert!(messages.user.ends_with("must start with { and end with }."));
        assert!(messages.user.contains("code fences"));
    }

    #[test]
    fn rollup_schemas_are_not_copies_of_lower_levels() {
        let month: Vec<&str> = schema(SummaryLevel::Month).field_names().collect();
        let rollup: Vec<&str> = schema(SummaryLevel::YearRollup).field_names().collect();
        assert_ne!(month, rollup);
    }
}

//! Moving summaries up the hierarchy.
//!
//! A session summary is built from the session's transcript chunks. Every
//! rollup level reads the stored summaries of the level below that start in
//! its period, renders them as text, and asks the coordinator for one summary
//! of the result. A week that straddles a month end belongs to the month it
//! starts in, as does a session that runs past midnight. Records are upserted, so re-running a level replaces the
//! previous result for the same period.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::coordinator::{Coordinator, TierRequest};
use crate::engine::RequestContext;
use crate::error::{RecapError, Result};
use crate::level::SummaryLevel;
use crate::store::{SourceUnit, SummaryRecord, SummaryStore};

/// A half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    /// The calendar period of `level` containing `at`. Year rollups cover
    /// everything up to the end of `at`'s year.
    pub fn containing(level: SummaryLevel, at: DateTime<Utc>) -> Result<Self> {
        let date = at.date_naive();
        let (start, end) = match level {
            SummaryLevel::Chunk | SummaryLevel::Session => {
                return Err(RecapError::Config(format!(
                    "{level} summaries are not tied to a calendar period"
                )));
            }
            SummaryLevel::Day => (date, date + Duration::days(1)),
            SummaryLevel::Week => {
                let monday =
                    date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                (monday, monday + Duration::days(7))
            }
            SummaryLevel::Month => {
                let first = ymd(date.year(), date.month(), 1)?;
                let next = if date.month() == 12 {
                    ymd(date.year() + 1, 1, 1)?
                } else {
                    ymd(date.year(), date.month() + 1, 1)?
                };
                (first, next)
            }
            SummaryLevel::Year => (ymd(date.year(), 1, 1)?, ymd(date.year() + 1, 1, 1)?),
            SummaryLevel::YearRollup => (ymd(1970, 1, 1)?, ymd(date.year() + 1, 1, 1)?),
        };

        Ok(Self {
            start: midnight(start)?,
            end: midnight(end)?,
        })
    }

    fn label(&self) -> String {
        let last = self.end - Duration::seconds(1);
        format!(
            "{} to {}",
            self.start.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        )
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| RecapError::Other(format!("invalid date {year}-{month}-{day}")))
}

fn midnight(date: NaiveDate) -> Result<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| RecapError::Other(format!("invalid midnight for {date}")))
}

/// Text fed to the next level for one stored summary.
fn rollup_text(record: &SummaryRecord) -> String {
    format!(
        "[{} {}]\n{}",
        record.level,
        record.period_start.format("%Y-%m-%d"),
        record.summary.render_plain()
    )
}

/// Drives the coordinator over the store, level by level.
pub struct Pipeline {
    coordinator: Arc<Coordinator>,
    store: Arc<dyn SummaryStore>,
}

impl Pipeline {
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>, store: Arc<dyn SummaryStore>) -> Self {
        Self { coordinator, store }
    }

    /// Summarize one session from its transcript chunks and store the result.
    pub async fn summarize_session(
        &self,
        session_id: &str,
        ctx: &RequestContext,
        target: TierRequest,
    ) -> Result<SummaryRecord> {
        let chunks = self.store.session_chunks(session_id)?;
        if chunks.is_empty() {
            return Err(RecapError::Store(format!(
                "session {session_id} has no transcript chunks"
            )));
        }

        let now = Utc::now();
        let period_start = chunks.iter().filter_map(|c| c.recorded_at).min().unwrap_or(now);
        let period_end = chunks.iter().filter_map(|c| c.recorded_at).max().unwrap_or(now);

        let ctx = RequestContext {
            metadata: with_entry(&ctx.metadata, "session", session_id),
            cancel: ctx.cancel.clone(),
        };
        let summary = self
            .coordinator
            .summarize(SummaryLevel::Session, &chunks, &ctx, target)
            .await?;

        let record = SummaryRecord {
            level: SummaryLevel::Session,
            period_start,
            period_end,
            session_id: Some(session_id.to_string()),
            summary,
        };
        self.store.upsert_summary(record.clone())?;
        tracing::info!("stored session summary for {session_id}");
        Ok(record)
    }

    /// Roll the level below `level` up into one summary for the period
    /// containing `at`. Returns `None` when the period has nothing to roll up.
    pub async fn rollup(
        &self,
        level: SummaryLevel,
        at: DateTime<Utc>,
        ctx: &RequestContext,
        target: TierRequest,
    ) -> Result<Option<SummaryRecord>> {
        let period = Period::containing(level, at)?;
        let child = level
            .child()
            .ok_or_else(|| RecapError::Config(format!("{level} has no level below it")))?;

        let children = self.store.summaries_in(child, period.start, period.end)?;
        if children.is_empty() {
            tracing::info!("no {child} summaries for {level} {}", period.label());
            return Ok(None);
        }

        let units: Vec<SourceUnit> = children
            .iter()
            .map(|r| SourceUnit {
                id: format!("{child}:{}", r.period_start.to_rfc3339()),
                session_id: r.session_id.clone(),
                text: rollup_text(r),
                recorded_at: Some(r.period_start),
            })
            .collect();

        let ctx = RequestContext {
            metadata: with_entry(&ctx.metadata, "period", &period.label()),
            cancel: ctx.cancel.clone(),
        };
        let summary = self
            .coordinator
            .summarize(level, &units, &ctx, target)
            .await?;

        let record = SummaryRecord {
            level,
            period_start: period.start,
            period_end: period.end,
            session_id: None,
            summary,
        };
        self.store.upsert_summary(record.clone())?;
        tracing::info!(
            "stored {level} summary for {} from {} {child} summaries",
            period.label(),
            children.len()
        );
        Ok(Some(record))
    }

    /// Roll up every level from day to `top` for the periods containing
    /// `at`, lowest first.
    pub async fn rollup_through(
        &self,
        top: SummaryLevel,
        at: DateTime<Utc>,
        ctx: &RequestContext,
        target: TierRequest,
    ) -> Result<Vec<SummaryRecord>> {
        let mut records = Vec::new();
        for level in SummaryLevel::ALL
            .into_iter()
            .filter(|l| *l >= SummaryLevel::Day && *l <= top)
        {
            if let Some(record) = self.rollup(level, at, ctx, target).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn with_entry(metadata: &[(String, String)], key: &str, value: &str) -> Vec<(String, String)> {
    let mut out = metadata.to_vec();
    out.push((key.to_string(), value.to_string()));
    out
}

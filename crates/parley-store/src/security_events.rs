use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::{SecurityEvent, SecurityEventKind};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Append events in one transaction.
    pub fn append_security_events(&self, events: &[SecurityEvent]) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO security_events (kind, payload, occurred_at) VALUES (?1, ?2, ?3)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.kind.as_str(),
                    serde_json::to_string(&event.payload)?,
                    event.timestamp.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// The most recent `limit` events, oldest first.
    pub fn load_security_events(&self, limit: u32) -> Result<Vec<SecurityEvent>> {
        let mut stmt = self.conn().prepare(
            "SELECT kind, payload, occurred_at FROM (
                 SELECT id, kind, payload, occurred_at FROM security_events
                 ORDER BY id DESC LIMIT ?1
             ) ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (kind, payload, occurred_at) = row?;
            let kind = SecurityEventKind::parse(&kind).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown security event kind {kind}").into(),
                )
            })?;
            let timestamp: DateTime<Utc> =
                DateTime::parse_from_rfc3339(&occurred_at)?.with_timezone(&Utc);
            events.push(SecurityEvent::new(kind, serde_json::from_str(&payload)?, timestamp));
        }
        Ok(events)
    }

    pub fn security_event_count(&self) -> Result<u64> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM security_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

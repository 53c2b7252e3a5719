//! Windows event log reader.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rereg_core::{EventReader, EventRecord, HostError, HostResult, Severity};
use serde::Deserialize;
use tracing::debug;

use crate::command::{self, ps_quote};

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "Id")]
    id: u32,
    #[serde(rename = "Level", default)]
    level: Option<u8>,
    #[serde(rename = "TimeCreated")]
    time_created: String,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<RawEvent>),
    One(RawEvent),
}

/// Reads a channel with `Get-WinEvent`.
#[derive(Debug, Clone)]
pub struct WinEventReader {
    timeout: Duration,
}

impl Default for WinEventReader {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

impl WinEventReader {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Script returning records in `channel` at or after `since`, as JSON with
/// UTC round-trip timestamps.
///
/// `Get-WinEvent` reports "No events were found" as a non-terminating error;
/// the trailing `exit 0` keeps an empty channel from looking like a failed query.
pub fn event_query_script(channel: &str, since: DateTime<Utc>) -> String {
    let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
    format!(
        "$since = [DateTime]::Parse({since}, $null, 'RoundtripKind').ToLocalTime(); \
         Get-WinEvent -FilterHashtable @{{ LogName = {channel}; StartTime = $since }} -ErrorAction SilentlyContinue | \
         Select-Object Id, Level, @{{ n = 'TimeCreated'; e = {{ $_.TimeCreated.ToUniversalTime().ToString('o') }} }}, Message | \
         ConvertTo-Json -Compress; \
         exit 0",
        since = ps_quote(&since),
        channel = ps_quote(channel),
    )
}

/// Parse script output. Empty output means no records.
pub fn parse_events(output: &str) -> HostResult<Vec<EventRecord>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parse_err = |reason: String| HostError::Parse {
        source_name: "event log".to_string(),
        reason,
    };

    let raw = match serde_json::from_str::<OneOrMany>(trimmed) {
        Ok(OneOrMany::Many(v)) => v,
        Ok(OneOrMany::One(e)) => vec![e],
        Err(e) => return Err(parse_err(e.to_string())),
    };

    raw.into_iter()
        .map(|e| {
            let timestamp = DateTime::parse_from_rfc3339(&e.time_created)
                .map_err(|err| parse_err(format!("bad timestamp {:?}: {}", e.time_created, err)))?
                .with_timezone(&Utc);
            Ok(EventRecord {
                id: e.id,
                timestamp,
                severity: Severity::from_level(e.level.unwrap_or(4)),
                message: e.message.unwrap_or_default().trim().to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl EventReader for WinEventReader {
    async fn query(&self, channel: &str, since: DateTime<Utc>) -> HostResult<Vec<EventRecord>> {
        let output = command::powershell(&event_query_script(channel, since), self.timeout).await?;
        if !output.success() {
            return Err(HostError::CommandFailed {
                program: "Get-WinEvent".to_string(),
                detail: output.diagnostic(),
            });
        }
        let records = parse_events(&output.stdout)?;
        debug!(channel = %channel, count = records.len(), "Event query");
        Ok(records)
    }
}

use log::info;
use serde::Serialize;
use std::sync::Mutex;

use crate::types::ProviderKind;

/// One timed provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub provider: ProviderKind,
    pub model_id: String,
    pub elapsed_ms: u64,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Fire-and-forget destination for call records. Implementations must not
/// panic or block.
pub trait TelemetrySink: Send + Sync {
    fn record_call(&self, record: CallRecord);
}

/// Writes records to the log at `info`.
#[derive(Debug, Default)]
pub struct LogTelemetrySink;

impl TelemetrySink for LogTelemetrySink {
    fn record_call(&self, record: CallRecord) {
        let tokens = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_else(|| "?".into());
        if record.success {
            info!(
                "{} {} ok in {}ms (in={} out={})",
                record.provider.id(),
                record.model_id,
                record.elapsed_ms,
                tokens(record.input_tokens),
                tokens(record.output_tokens)
            );
        } else {
            info!(
                "{} {} failed in {}ms: {}",
                record.provider.id(),
                record.model_id,
                record.elapsed_ms,
                record.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryTelemetrySink {
    records: Mutex<Vec<CallRecord>>,
}

impl MemoryTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemoryTelemetrySink {
    fn record_call(&self, record: CallRecord) {
        match self.records.lock() {
            Ok(mut guard) => guard.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_collects_in_order() {
        let sink = MemoryTelemetrySink::new();
        for ms in [5, 9] {
            sink.record_call(CallRecord {
                provider: ProviderKind::Groq,
                model_id: "m".into(),
                elapsed_ms: ms,
                input_tokens: None,
                output_tokens: Some(3),
                success: true,
                error_message: None,
            });
        }
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].elapsed_ms, 9);
    }
}

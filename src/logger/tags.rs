/// Log tags identify the subsystem that produced a message

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Config,
    Ledger,
    Detector,
    Decision,
    Dispatch,
    Source,
    Persistence,
    Audit,
}

impl LogTag {
    /// Plain uppercase name used in file output
    pub fn to_plain_string(&self) -> &'static str {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Config => "CONFIG",
            LogTag::Ledger => "LEDGER",
            LogTag::Detector => "DETECTOR",
            LogTag::Decision => "DECISION",
            LogTag::Dispatch => "DISPATCH",
            LogTag::Source => "SOURCE",
            LogTag::Persistence => "PERSIST",
            LogTag::Audit => "AUDIT",
        }
    }

    /// Parse the key given to `--debug <key>`
    pub fn from_debug_key(key: &str) -> Option<Self> {
        match key.to_lowercase().as_str() {
            "system" => Some(LogTag::System),
            "config" => Some(LogTag::Config),
            "ledger" => Some(LogTag::Ledger),
            "detector" => Some(LogTag::Detector),
            "decision" => Some(LogTag::Decision),
            "dispatch" => Some(LogTag::Dispatch),
            "source" => Some(LogTag::Source),
            "persistence" => Some(LogTag::Persistence),
            "audit" => Some(LogTag::Audit),
            _ => None,
        }
    }
}

// Evaluation counters
pub const FLAG_EVALUATIONS_COUNTER: &str = "toolbar_flag_evaluations_total";
pub const FLAG_REEVALUATION_ERRORS_COUNTER: &str = "toolbar_flag_reevaluation_errors_total";

// Override bookkeeping
pub const OVERRIDE_CHANGES_COUNTER: &str = "toolbar_override_changes_total";
pub const CONTEXT_OVERRIDE_CHANGES_COUNTER: &str = "toolbar_context_override_changes_total";
pub const CONTEXT_PUSH_ERRORS_COUNTER: &str = "toolbar_context_push_errors_total";

// Listener fault boundaries, labelled by source (toolbar|client)
pub const LISTENER_ERRORS_COUNTER: &str = "toolbar_listener_errors_total";

// Persistence, labelled by operation (load|save|clear|mirror)
pub const STORAGE_ERRORS_COUNTER: &str = "toolbar_storage_errors_total";

// Server-side application
pub const SERVER_OVERRIDES_APPLIED_COUNTER: &str = "toolbar_server_overrides_applied_total";
pub const SNAPSHOT_PARSE_ERRORS_COUNTER: &str = "toolbar_snapshot_parse_errors_total";

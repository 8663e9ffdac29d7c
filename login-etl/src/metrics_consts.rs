pub const MESSAGES_RECEIVED: &str = "login_etl_messages_received";
pub const MESSAGES_ACKNOWLEDGED: &str = "login_etl_messages_acknowledged";
pub const EMPTY_PAYLOADS: &str = "login_etl_empty_payloads";
pub const PAYLOAD_PARSE_ERRORS: &str = "login_etl_payload_parse_errors";
pub const INVALID_APP_VERSIONS: &str = "login_etl_invalid_app_versions";
pub const RECORDS_WRITTEN: &str = "login_etl_records_written";
pub const QUEUE_RECEIVE_ERRORS: &str = "login_etl_queue_receive_errors";
pub const STORAGE_ERRORS: &str = "login_etl_storage_errors";
pub const STALLED_RECLAIMED: &str = "login_etl_stalled_claims_reclaimed";
pub const BATCH_COMMIT_TIME: &str = "login_etl_batch_commit_time_ms";
pub const CYCLE_TIME: &str = "login_etl_cycle_time_ms";

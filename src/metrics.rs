//! Metric keys reported by pipelines and their streams.

pub const PIPELINE_UPTIME: &str = "_pipeline_uptime";
pub const PIPELINE_STATE: &str = "_pipeline_state";
pub const PIPELINE_RUN_TIMES: &str = "_pipeline_run_times";
pub const PIPELINE_START_TIME: &str = "_pipeline_start_time";
pub const PIPELINE_EXIT_TIME: &str = "_pipeline_exit_time";
pub const PIPELINE_NEXT_RUN_TIME: &str = "_pipeline_next_run_time";
pub const PIPELINE_LAST_START_TIME: &str = "_pipeline_last_start_time";
pub const PIPELINE_LAST_END_TIME: &str = "_pipeline_last_end_time";

pub const STREAM_BUFFER_SIZE: &str = "_stream_buffer_size";
pub const STREAM_REPLICA: &str = "_stream_replica";
pub const STREAM_RUN_TIMES: &str = "_stream_run_times";
pub const STREAM_RUNNING_REPLICA: &str = "_stream_running_replica";
pub const STREAM_START_TIME: &str = "_stream_start_time";
pub const STREAM_EXIT_TIME: &str = "_stream_exit_time";
pub const STREAM_LAST_START_TIME: &str = "_stream_last_start_time";
pub const STREAM_LAST_END_TIME: &str = "_stream_last_end_time";
pub const STREAM_SUCCESS_COUNT: &str = "_stream_success_count";
pub const STREAM_ERROR_COUNT: &str = "_stream_error_count";
pub const STREAM_ELAPSED: &str = "_stream_elapsed";
/// Worker-pool state: `not_started`, `running`, `draining` or `closed`.
pub const STREAM_STATE: &str = "_stream_state";

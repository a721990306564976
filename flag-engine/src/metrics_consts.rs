pub const FLAG_EVALUATION_COUNTER: &str = "flag_evaluations_total";
pub const FLAG_OVERRIDE_LOOKUP_ERROR_COUNTER: &str = "flag_override_lookup_errors_total";
pub const FLAG_CACHE_HIT_COUNTER: &str = "flag_cache_hit_total";
pub const FLAG_CACHE_REFRESH_COUNTER: &str = "flag_cache_refresh_total";
pub const FLAG_CACHE_REFRESH_ERROR_COUNTER: &str = "flag_cache_refresh_errors_total";
pub const FLAG_CACHE_STALE_SERVED_COUNTER: &str = "flag_cache_stale_served_total";
pub const FLAG_CACHE_REFRESH_TIME: &str = "flag_cache_refresh_ms";
pub const FLAG_CACHE_INVALIDATION_COUNTER: &str = "flag_cache_invalidations_total";
pub const FLAG_DEFINITIONS_LOADED_GAUGE: &str = "flag_definitions_loaded";

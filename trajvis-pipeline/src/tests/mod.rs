mod test_config;
mod test_data;
mod test_dvi;
mod test_render;
mod test_results;
mod test_store;
mod test_timevis_dynavis;

/// Initialize logging for tests
pub(crate) fn init() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

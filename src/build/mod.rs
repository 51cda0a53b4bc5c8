pub mod auto_detect;
pub mod builder;
pub mod dispatcher;
pub mod log_stream;
pub mod post_build;
pub mod registry;

//! Built-in pipeline stages

mod event_log;
mod filter;
mod formatter;

pub use event_log::EventLogSink;
pub use filter::MessageFilterSink;
pub use formatter::{
    BytesFormatter, DelimitedFormatter, Formatter, FormatterContext, FormatterSink, ParserContext,
    Utf8Formatter,
};

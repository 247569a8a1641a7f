pub mod classifier;
pub mod tail;

pub use classifier::{classify, classify_line, line_timestamp, EventTag, LineClock, LogEvent, LogEventKind};
pub use tail::{
    channel_for_log_file, BoundaryReason, LogTailReader, SessionBoundary, TailCursor, TailError,
    TailHealth, TailLine, TailPoll, TailReaderOptions,
};

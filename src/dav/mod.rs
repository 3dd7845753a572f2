mod client;
pub mod headers;
mod progress_stream;
mod transport;

pub use client::DavClient;
pub use progress_stream::{body_stream, ProgressStream, STREAM_CHUNK_SIZE};
pub use transport::{
    mkcol_method,
    move_method,
    DavRequest,
    DavResponse,
    ProgressFn,
    Transport,
    TransportError,
};

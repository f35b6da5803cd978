use thiserror::Error;

use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("cache entry metadata at {path} is corrupt: {reason}")]
    CorruptMetadata { path: String, reason: String },

    #[error(
        "cache entry for `{task_name}` ({task_id}) was stored with codec `{stored_tag}` but \
         read back with codec `{requested_tag}`"
    )]
    CodecMismatch {
        task_name: String,
        task_id: String,
        stored_tag: String,
        requested_tag: String,
    },
}

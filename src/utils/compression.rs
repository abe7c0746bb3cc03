//! Threshold-gated compression used by the secure channel.
//!
//! Wraps [`lz4`](crate::utils::lz4) with the size threshold and the
//! "strictly smaller" rule, and records compression metrics.

use crate::error::{ProtocolError, Result};
use crate::utils::lz4;
use crate::utils::metrics::global_metrics;
use tracing::{debug, trace};

/// Largest payload a compressed datagram may expand to
pub const MAX_DECOMPRESSION_SIZE: usize = 64 * 1024;

/// Compress data if it meets the threshold and the result is strictly smaller.
/// Returns the output bytes and a flag indicating whether compression was applied.
pub fn maybe_compress(data: &[u8], threshold_bytes: usize) -> (Vec<u8>, bool) {
    if data.len() <= threshold_bytes {
        return (data.to_vec(), false);
    }

    let metrics = global_metrics();
    metrics.compression_attempt();

    match lz4::compress(data) {
        Some(compressed) => {
            metrics.compression_success();
            trace!(
                before = data.len(),
                after = compressed.len(),
                "payload compressed"
            );
            (compressed, true)
        }
        None => (data.to_vec(), false),
    }
}

/// Decompress data only if it was previously compressed; otherwise return as-is.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if the stream is corrupt or
/// expands beyond [`MAX_DECOMPRESSION_SIZE`].
pub fn maybe_decompress(data: &[u8], was_compressed: bool) -> Result<Vec<u8>> {
    if !was_compressed {
        return Ok(data.to_vec());
    }

    lz4::decompress(data, MAX_DECOMPRESSION_SIZE).map_err(|_| {
        debug!(len = data.len(), "rejecting corrupt compressed payload");
        ProtocolError::DecompressionFailure
    })
}

#![no_main]

use libfuzzer_sys::fuzz_target;
use tos_net::utils::compression::{maybe_compress, maybe_decompress, MAX_DECOMPRESSION_SIZE};
use tos_net::utils::lz4;

fuzz_target!(|data: &[u8]| {
    // Anything the compressor emits must decode back to the input
    if let Some(compressed) = lz4::compress(data) {
        assert!(compressed.len() < data.len());
        let restored = lz4::decompress(&compressed, data.len()).expect("own output must decode");
        assert_eq!(restored, data);
    }

    let (out, compressed) = maybe_compress(data, 512);
    let _ = maybe_decompress(&out, compressed);

    // Raw decompression of malformed streams must respect the size limit
    if let Ok(out) = maybe_decompress(data, true) {
        assert!(out.len() <= MAX_DECOMPRESSION_SIZE);
    }
});

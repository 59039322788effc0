//! Gzip compression for large text broadcasts

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::metrics::MessageMetrics;
use crate::transport::Payload;

pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Compress a text payload longer than `threshold` bytes into a binary gzip
/// payload. Binary and short payloads are returned unchanged, as is the
/// original if compression fails.
pub fn compress_payload(payload: Payload, threshold: usize) -> Payload {
    match payload {
        Payload::Text(text) if text.len() > threshold => match gzip(text.as_bytes()) {
            Ok(compressed) => {
                MessageMetrics::record_compressed();
                tracing::debug!(
                    original_bytes = text.len(),
                    compressed_bytes = compressed.len(),
                    "Compressed broadcast payload"
                );
                Payload::Binary(compressed)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Payload compression failed, sending uncompressed");
                Payload::Text(text)
            }
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_large_text_is_gzipped() {
        let text = "price update ".repeat(200);
        let compressed = compress_payload(Payload::text(text.clone()), 1024);

        let Payload::Binary(bytes) = compressed else {
            panic!("expected binary payload");
        };
        assert!(bytes.len() < text.len());

        let mut decoded = String::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let text = "x".repeat(1024);
        assert_eq!(
            compress_payload(Payload::text(text.clone()), 1024),
            Payload::text(text)
        );
    }

    #[test]
    fn test_binary_untouched() {
        let bytes = vec![7u8; 4096];
        assert_eq!(
            compress_payload(Payload::Binary(bytes.clone()), 1024),
            Payload::Binary(bytes)
        );
    }
}

//! Magic-byte content-type sniffing for derivative and source bytes served
//! straight off disk, so a served file's `Content-Type` reflects what it
//! actually is rather than trusting `ImageRecord::source_format`.

pub fn sniff_content_type(data: &[u8]) -> &'static str {
    if data.len() >= 3 && data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF {
        return "image/jpeg";
    }
    if data.len() >= 8 && data[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return "image/png";
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return "image/webp";
    }
    if data.len() >= 6 && &data[0..3] == b"GIF" {
        return "image/gif";
    }
    if data.len() >= 2 && &data[0..2] == b"BM" {
        return "image/bmp";
    }
    "application/octet-stream"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_jpeg_and_png() {
        assert_eq!(sniff_content_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(
            sniff_content_type(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
            "image/png"
        );
    }

    #[test]
    fn falls_back_for_unrecognized_bytes() {
        assert_eq!(sniff_content_type(&[0x00, 0x01]), "application/octet-stream");
    }
}

//! QR code rendering of the connection URL for terminal display.
//!
//! Two QR rows share one terminal row via Unicode half blocks, which keeps
//! the code roughly square in a 2:1 character cell.

use qrcodegen::{QrCode, QrCodeEcc};

/// Quiet zone around the code, in modules.
const QUIET_ZONE: i32 = 2;

/// Render `data` as terminal lines that fit in `max_width` x `max_height`.
///
/// Error correction is lowered step by step until the code fits. If it
/// never fits, a short explanation is returned instead, with the URL itself
/// so it can still be typed in.
pub fn render_lines(data: &str, max_width: u16, max_height: u16) -> Vec<String> {
    for ecc in [QrCodeEcc::High, QrCodeEcc::Medium, QrCodeEcc::Low] {
        let Ok(code) = QrCode::encode_text(data, ecc) else {
            continue;
        };

        let (width, height) = dimensions(&code);
        if width <= usize::from(max_width) && height <= usize::from(max_height) {
            log::debug!(
                "QR code fits with ecc={ecc:?} -> {width}x{height} \
                 (max: {max_width}x{max_height})"
            );
            return half_block_lines(&code);
        }
    }

    match QrCode::encode_text(data, QrCodeEcc::Low) {
        Ok(code) => {
            let (width, height) = dimensions(&code);
            log::warn!(
                "QR code too large for terminal \
                 (available: {max_width}x{max_height}, need: {width}x{height})"
            );
            vec![
                "Terminal too small for QR code".to_string(),
                format!("Available: {max_width}x{max_height}"),
                format!("Need: {width}x{height}"),
                String::new(),
                format!("Connect to {data}"),
            ]
        }
        Err(_) => {
            log::warn!("Data too long for QR code ({} chars)", data.len());
            vec![
                "URL too long for QR code".to_string(),
                String::new(),
                format!("Connect to {data}"),
            ]
        }
    }
}

/// Terminal columns and rows needed for `code`, quiet zone included.
fn dimensions(code: &QrCode) -> (usize, usize) {
    let total = usize::try_from(code.size() + QUIET_ZONE * 2).unwrap_or(0);
    (total, total.div_ceil(2))
}

fn half_block_lines(code: &QrCode) -> Vec<String> {
    let total = code.size() + QUIET_ZONE * 2;
    // get_module is false outside the symbol, which draws the quiet zone.
    let dark = |x: i32, y: i32| code.get_module(x - QUIET_ZONE, y - QUIET_ZONE);

    (0..total)
        .step_by(2)
        .map(|upper_y| {
            (0..total)
                .map(|x| match (dark(x, upper_y), dark(x, upper_y + 1)) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_url_renders_square_code() {
        let lines = render_lines("ws://192.168.1.20:8765", 100, 50);
        assert!(!lines.is_empty());
        assert!(!lines[0].contains("too small"));

        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
        assert_eq!(lines.len(), width.div_ceil(2));
    }

    #[test]
    fn test_quiet_zone_is_blank() {
        let lines = render_lines("ws://10.0.0.1:8765", 100, 50);
        assert!(lines[0].chars().all(|c| c == ' '));
        assert!(lines.iter().all(|l| l.starts_with("  ") && l.ends_with("  ")));
        assert!(lines.join("").contains('█'));
    }

    #[test]
    fn test_insufficient_space_falls_back_to_text() {
        let url = "ws://192.168.1.20:8765";
        let lines = render_lines(url, 10, 5);
        assert_eq!(lines[0], "Terminal too small for QR code");
        assert!(lines.last().unwrap().contains(url));
    }

    #[test]
    fn test_lower_ecc_used_when_high_does_not_fit() {
        let url = "ws://192.168.100.200:65535";
        let high = QrCode::encode_text(url, QrCodeEcc::High).unwrap();
        let low = QrCode::encode_text(url, QrCodeEcc::Low).unwrap();
        assert!(low.size() < high.size());

        let (width, height) = dimensions(&low);
        let lines = render_lines(url, width as u16, height as u16);
        assert_eq!(lines.len(), height);
        assert_eq!(lines[0].chars().count(), width);
    }

    #[test]
    fn test_data_too_long() {
        let lines = render_lines(&"a".repeat(8000), 500, 500);
        assert_eq!(lines[0], "URL too long for QR code");
    }
}

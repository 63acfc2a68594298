use crate::error::Error;

/// Maximum payload size (125 bytes) allowed on a Close frame so the
/// big-endian status code plus UTF-8 reason still fits a control frame.
const MAX_CLOSE_PAYLOAD: usize = 125;

/// Whether `code` is legal as the status code of a Close frame actually
/// observed on the wire, per spec §3/§6: 0-999, 1004, 1012-1014, values
/// >= 5000, and the report-only codes 1005/1006/1015 (which a peer must
/// never encode into a frame, even though they're valid to *report*) are
/// all rejected.
fn is_valid_wire_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

/// Reads the status-code-plus-reason view of a Close frame's payload, per
/// spec §4.2. A payload shorter than 2 bytes has no status code, and is
/// reported as `NoStatusReceived` (1005) with an empty reason — this is
/// the S4/edge-case behavior for an empty Close frame. A payload carrying
/// a code outside the valid 4-digit wire range is a protocol error per
/// spec §3, not a value to pass through.
pub fn close_code_view(payload: &[u8]) -> Result<(u16, String), Error> {
    if payload.is_empty() {
        return Ok((1005, String::new()));
    }
    if payload.len() == 1 {
        return Err(Error::InvalidCloseFrame);
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    if !is_valid_wire_close_code(code) {
        return Err(Error::InvalidCloseCode(code));
    }
    let reason = String::from_utf8(payload[2..].to_vec())?;
    Ok((code, reason))
}

/// Builds a Close frame payload: big-endian code followed by the UTF-8
/// reason bytes. Fails if the encoded reason pushes the total past the
/// 125-byte control-frame cap.
pub fn append_close_code(code: u16, reason: &str) -> Result<Vec<u8>, Error> {
    let reason_bytes = reason.as_bytes();
    if 2 + reason_bytes.len() > MAX_CLOSE_PAYLOAD {
        return Err(Error::InvalidCloseFrame);
    }
    let mut payload = Vec::with_capacity(2 + reason_bytes.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason_bytes);
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_reports_no_status_received() {
        let (code, reason) = close_code_view(&[]).unwrap();
        assert_eq!(code, 1005);
        assert_eq!(reason, "");
    }

    #[test]
    fn round_trips_code_and_reason() {
        let payload = append_close_code(1000, "bye").unwrap();
        let (code, reason) = close_code_view(&payload).unwrap();
        assert_eq!(code, 1000);
        assert_eq!(reason, "bye");
    }

    #[test]
    fn rejects_oversized_reason() {
        let reason = "x".repeat(200);
        assert!(append_close_code(1000, &reason).is_err());
    }

    #[test]
    fn rejects_report_only_and_reserved_codes_on_the_wire() {
        for code in [999u16, 1004, 1005, 1006, 1012, 1015, 5000] {
            let payload = append_close_code_unchecked(code, "");
            let err = close_code_view(&payload).unwrap_err();
            assert!(matches!(err, Error::InvalidCloseCode(c) if c == code));
        }
    }

    #[test]
    fn accepts_application_defined_range() {
        let payload = append_close_code(3500, "custom").unwrap();
        let (code, reason) = close_code_view(&payload).unwrap();
        assert_eq!(code, 3500);
        assert_eq!(reason, "custom");
    }

    #[test]
    fn single_byte_payload_is_rejected() {
        assert!(close_code_view(&[1]).is_err());
    }

    fn append_close_code_unchecked(code: u16, reason: &str) -> Vec<u8> {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        payload
    }
}

//! Response capture (C8): observes status and body bytes flowing to the
//! client without buffering the whole stream — past a soft cap only the
//! fact that truncation happened is retained (§4.7 "Response capture").

pub struct ResponseCapture {
	cap_bytes: usize,
	captured: Vec<u8>,
	truncated: bool,
	status: Option<u16>,
	pub wrote_any_bytes: bool,
}

impl ResponseCapture {
	pub fn new(cap_bytes: usize) -> Self {
		Self { cap_bytes, captured: Vec::new(), truncated: false, status: None, wrote_any_bytes: false }
	}

	pub fn record_status(&mut self, status: u16) {
		self.status.get_or_insert(status);
	}

	pub fn record_bytes(&mut self, bytes: &[u8]) {
		if bytes.is_empty() {
			return;
		}
		self.wrote_any_bytes = true;
		if self.truncated {
			return;
		}
		let remaining = self.cap_bytes.saturating_sub(self.captured.len());
		let take = remaining.min(bytes.len());
		self.captured.extend_from_slice(&bytes[..take]);
		if take < bytes.len() {
			self.truncated = true;
		}
	}

	pub fn status(&self) -> Option<u16> {
		self.status
	}

	pub fn captured_body(&self) -> &[u8] {
		&self.captured
	}

	pub fn is_truncated(&self) -> bool {
		self.truncated
	}
}

impl Default for ResponseCapture {
	fn default() -> Self {
		Self::new(1024 * 1024)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn truncates_past_cap_without_growing_unbounded() {
		let mut capture = ResponseCapture::new(4);
		capture.record_bytes(b"ab");
		capture.record_bytes(b"cdef");
		assert_eq!(capture.captured_body(), b"abcd");
		assert!(capture.is_truncated());
	}

	#[test]
	fn first_byte_sets_wrote_any_bytes() {
		let mut capture = ResponseCapture::default();
		assert!(!capture.wrote_any_bytes);
		capture.record_bytes(b"x");
		assert!(capture.wrote_any_bytes);
	}
}

//! Fragmentation and reassembly (§4.2): honoring a transport's maximum
//! message size without the caller knowing a payload was ever split.

use std::collections::BTreeMap;

use md5::{Digest, Md5};
use thiserror::Error as ThisError;

use crate::{
    call_id::{CallId, ResponseId},
    envelope::{Envelope, MessageType, ProtocolVersion, wire},
    transport::{Destination, Sender, TransportError},
};

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("fragment set for response {0} is missing indices at terminator time")]
    MissingFragments(ResponseId),
    #[error("fragment set for response {0} failed digest verification")]
    DigestMismatch(ResponseId),
}

/// Computes the hex-encoded MD5 digest over the concatenation of `slices`, in
/// order, matching the digest an [`emit`]ted terminator carries.
pub fn digest(slices: &[&[u8]]) -> String {
    let mut hasher = Md5::new();
    for slice in slices {
        hasher.update(slice);
    }
    format!("{:x}", hasher.finalize())
}

/// Splits `bytes` into contiguous, non-empty slices no longer than
/// `max_fragment_size`. Always produces at least one slice, even for an empty
/// input.
pub fn split(bytes: &[u8], max_fragment_size: usize) -> Vec<&[u8]> {
    assert!(max_fragment_size > 0, "max_fragment_size must be positive");
    if bytes.is_empty() {
        return vec![bytes];
    }
    bytes.chunks(max_fragment_size).collect()
}

/// Sends `payload` as a sequence of `SignalFragment` envelopes followed by an
/// `EndOfFragmentedMessage` terminator, under a fresh response id.
///
/// This is the sending half of §4.2's `emit`; `slices` is typically the
/// output of [`split`].
pub async fn emit(
    sender: &dyn Sender,
    version: ProtocolVersion,
    call_id: CallId,
    response_id: ResponseId,
    reply_to: Option<Destination>,
    slices: &[&[u8]],
) -> Result<(), TransportError> {
    use crate::{envelope::encode, transport::SendOptions};

    let whole_digest = digest(slices);

    for (index, slice) in slices.iter().enumerate() {
        let mut envelope = Envelope::new(version, MessageType::SignalFragment, call_id)
            .with_response_id(response_id)
            .with_payload(slice.to_vec());
        if let Some(destination) = &reply_to {
            envelope = envelope.with_reply_to(destination.clone());
        }
        envelope.properties.set(wire::FRAGMENT_INDEX, index as i64);
        sender.send(encode(&envelope), SendOptions::default()).await?;
    }

    let mut terminator = Envelope::new(version, MessageType::EndOfFragmentedMessage, call_id)
        .with_response_id(response_id);
    if let Some(destination) = &reply_to {
        terminator = terminator.with_reply_to(destination.clone());
    }
    terminator
        .properties
        .set(wire::FRAGMENTS_TOTAL, slices.len() as i64)
        .set(wire::DATA_CHECKSUM_MD5, whole_digest);
    sender
        .send(encode(&terminator), SendOptions::default())
        .await
}

/// The partially-received fragments of a single response, keyed by index.
#[derive(Debug, Default)]
struct PendingResponse {
    fragments: BTreeMap<u32, Vec<u8>>,
    terminator: Option<(u32, String)>,
}

/// Accumulates fragments for any number of concurrently in-flight responses
/// within one call and reassembles each once its terminator has arrived and
/// every index is present.
///
/// One `FragmentAssembler` is owned per call; it is never shared across
/// calls (§3's fragment buffer invariant).
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    pending: std::collections::HashMap<ResponseId, PendingResponse>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a `SignalFragment`. Accepting a duplicate index is a no-op.
    pub fn add_fragment(&mut self, response_id: ResponseId, index: u32, bytes: Vec<u8>) {
        self.pending
            .entry(response_id)
            .or_default()
            .fragments
            .entry(index)
            .or_insert(bytes);
    }

    /// Records an `EndOfFragmentedMessage` terminator and attempts assembly.
    /// Returns the reassembled payload on success; leaves the partial set in
    /// place on [`FragmentError::MissingFragments`] (more fragments may still
    /// be in flight) but drops it entirely on
    /// [`FragmentError::DigestMismatch`] (§4.2: any mismatch rejects the
    /// whole set).
    pub fn add_terminator(
        &mut self,
        response_id: ResponseId,
        total: u32,
        expected_digest: String,
    ) -> Result<Vec<u8>, FragmentError> {
        {
            let pending = self.pending.entry(response_id).or_default();
            pending.terminator = Some((total, expected_digest));
        }
        self.try_reassemble(response_id)
    }

    fn try_reassemble(&mut self, response_id: ResponseId) -> Result<Vec<u8>, FragmentError> {
        let pending = self
            .pending
            .get(&response_id)
            .expect("try_reassemble called without a pending entry");
        let Some((total, expected_digest)) = pending.terminator.clone() else {
            return Err(FragmentError::MissingFragments(response_id));
        };

        if (0..total).any(|index| !pending.fragments.contains_key(&index)) {
            return Err(FragmentError::MissingFragments(response_id));
        }

        let mut assembled = Vec::new();
        for index in 0..total {
            assembled.extend_from_slice(&pending.fragments[&index]);
        }
        let actual_digest = digest(&[&assembled]);

        self.pending.remove(&response_id);

        if actual_digest != expected_digest {
            return Err(FragmentError::DigestMismatch(response_id));
        }
        Ok(assembled)
    }

    /// Drops any pending fragments for `response_id`, e.g. when the owning
    /// call expires before a terminator arrives.
    pub fn discard(&mut self, response_id: ResponseId) {
        self.pending.remove(&response_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_produces_contiguous_nonempty_slices() {
        let bytes = b"0123456789";
        let slices = split(bytes, 4);
        assert_eq!(slices, vec![&b"0123"[..], &b"4567"[..], &b"89"[..]]);
    }

    #[test]
    fn split_of_empty_input_yields_one_empty_slice() {
        assert_eq!(split(&[], 4), vec![&b""[..]]);
    }

    #[test]
    fn reassembles_out_of_order_fragments() {
        let payload = b"the quick brown fox jumps over the lazy dog";
        let slices = split(payload, 10);
        let expected_digest = digest(&slices);
        let response_id = ResponseId::new();

        let mut assembler = FragmentAssembler::new();
        for (index, slice) in slices.iter().enumerate().rev() {
            assembler.add_fragment(response_id, index as u32, slice.to_vec());
        }
        let result = assembler
            .add_terminator(response_id, slices.len() as u32, expected_digest)
            .unwrap();
        assert_eq!(result, payload);
    }

    #[test]
    fn missing_fragment_at_terminator_time_is_retained_for_later_arrival() {
        let response_id = ResponseId::new();
        let mut assembler = FragmentAssembler::new();
        assembler.add_fragment(response_id, 0, b"a".to_vec());

        let err = assembler
            .add_terminator(response_id, 2, digest(&[b"a", b"b"]))
            .unwrap_err();
        assert_eq!(err, FragmentError::MissingFragments(response_id));

        assembler.add_fragment(response_id, 1, b"b".to_vec());
        let result = assembler
            .add_terminator(response_id, 2, digest(&[b"a", b"b"]))
            .unwrap();
        assert_eq!(result, b"ab");
    }

    #[test]
    fn digest_mismatch_drops_the_fragment_set() {
        let response_id = ResponseId::new();
        let mut assembler = FragmentAssembler::new();
        assembler.add_fragment(response_id, 0, b"a".to_vec());

        let err = assembler
            .add_terminator(response_id, 1, "0000deadbeef".to_owned())
            .unwrap_err();
        assert_eq!(err, FragmentError::DigestMismatch(response_id));

        // the set was dropped: re-adding fragments and terminating again
        // starts fresh rather than observing stale state.
        assembler.add_fragment(response_id, 0, b"a".to_vec());
        let result = assembler
            .add_terminator(response_id, 1, digest(&[b"a"]))
            .unwrap();
        assert_eq!(result, b"a");
    }

    #[tokio::test]
    async fn emit_sends_fragments_then_terminator() {
        use crate::transport::{SendOptions, TransportMessage};
        use async_trait::async_trait;
        use std::sync::Mutex;

        #[derive(Default)]
        struct RecordingSender {
            sent: Mutex<Vec<TransportMessage>>,
        }

        #[async_trait]
        impl Sender for RecordingSender {
            async fn send(
                &self,
                message: TransportMessage,
                _options: SendOptions,
            ) -> Result<(), TransportError> {
                self.sent.lock().unwrap().push(message);
                Ok(())
            }
        }

        let sender = RecordingSender::default();
        let payload = b"0123456789";
        let slices = split(payload, 4);
        emit(
            &sender,
            ProtocolVersion::V2,
            CallId::new(),
            ResponseId::new(),
            None,
            &slices,
        )
        .await
        .unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), slices.len() + 1);
        let last = sent.last().unwrap();
        assert_eq!(
            last.properties.get_text(wire::MESSAGE_TYPE).unwrap(),
            "EndOfFragmentedMessage"
        );
    }
}

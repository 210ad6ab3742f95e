// size of the SEC_CHANNEL_BINDINGS header
const SEC_CHANNEL_BINDINGS_SIZE: usize = 32;

/// Channel-binding data tying an authentication token to a specific secure
/// channel, laid out as a
/// [SEC_CHANNEL_BINDINGS](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-sec_channel_bindings)
/// structure.
///
/// Only application data (e.g. a TLS channel's exported binding bytes) is
/// bound; the initiator and acceptor address fields are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBindings {
    pub application_data: Vec<u8>,
}

impl ChannelBindings {
    /// Builds channel bindings from the application-data payload.
    ///
    /// Returns `None` for an empty payload: negotiation then proceeds
    /// without channel binding.
    pub fn from_application_data<T: AsRef<[u8]>>(data: T) -> Option<Self> {
        let data = data.as_ref();

        if data.is_empty() {
            return None;
        }

        Some(Self {
            application_data: data.to_vec(),
        })
    }

    /// Length of the encoded structure: the 32-byte header immediately
    /// followed by the application data.
    pub fn encoded_len(&self) -> usize {
        SEC_CHANNEL_BINDINGS_SIZE + self.application_data.len()
    }

    /// Encodes the structure into its wire layout. All address fields are
    /// zero and the application-data offset is fixed at 32.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = vec![0; self.encoded_len()];

        // bytes 0..24: initiator/acceptor addr type, length and offset, all zero
        buffer[24..28].copy_from_slice(&(self.application_data.len() as u32).to_le_bytes());
        buffer[28..32].copy_from_slice(&(SEC_CHANNEL_BINDINGS_SIZE as u32).to_le_bytes());
        buffer[SEC_CHANNEL_BINDINGS_SIZE..].copy_from_slice(&self.application_data);

        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelBindings, SEC_CHANNEL_BINDINGS_SIZE};

    #[test]
    fn empty_payload_produces_no_bindings() {
        assert_eq!(ChannelBindings::from_application_data(Vec::<u8>::new()), None);
    }

    #[test]
    fn encoded_layout() {
        let channel_bindings = ChannelBindings::from_application_data([1, 2, 3, 4]).unwrap();

        let buffer = channel_bindings.encode();

        assert_eq!(buffer.len(), 36);
        assert_eq!(channel_bindings.encoded_len(), 36);
        // initiator and acceptor fields are zero
        assert!(buffer[..24].iter().all(|b| *b == 0));
        // application data length and fixed offset
        assert_eq!(u32::from_le_bytes(buffer[24..28].try_into().unwrap()), 4);
        assert_eq!(
            u32::from_le_bytes(buffer[28..32].try_into().unwrap()),
            SEC_CHANNEL_BINDINGS_SIZE as u32
        );
        assert_eq!(&buffer[32..], [1, 2, 3, 4]);
    }

    #[test]
    fn ten_byte_payload_yields_42_byte_buffer() {
        let payload = [7; 10];

        let channel_bindings = ChannelBindings::from_application_data(payload).unwrap();
        let buffer = channel_bindings.encode();

        assert_eq!(buffer.len(), 42);
        assert_eq!(u32::from_le_bytes(buffer[28..32].try_into().unwrap()), 32);
        assert_eq!(&buffer[32..], payload);
    }
}

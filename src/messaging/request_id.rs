use std::fmt::{Debug, Display, Formatter};

use bytes::{Buf, BufMut};
use uuid::Uuid;

use crate::error::DecodeError;


/// The sole correlation key between a request and its response. A fresh id is generated for
///  every logical client call, and the server echoes it back without ever creating or changing one.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub const SERIALIZED_LEN: usize = 16;

    pub fn random() -> RequestId {
        RequestId(Uuid::new_v4())
    }

    pub const fn from_u128(raw: u128) -> RequestId {
        RequestId(Uuid::from_u128(raw))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u128(self.as_u128());
    }

    pub fn try_deser(buf: &mut impl Buf) -> Result<RequestId, DecodeError> {
        Ok(RequestId::from_u128(buf.try_get_u128()?))
    }
}

impl Debug for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use bytes::BytesMut;
    use super::*;

    #[test]
    fn test_random_ids_are_unique() {
        let ids = (0..10_000)
            .map(|_| RequestId::random())
            .collect::<HashSet<_>>();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_ser_is_big_endian() {
        let mut buf = BytesMut::new();
        RequestId::from_u128(0x0102).ser(&mut buf);
        assert_eq!(buf.len(), RequestId::SERIALIZED_LEN);
        assert_eq!(&buf[14..], &[1, 2]);
    }

    #[test]
    fn test_deser_truncated() {
        let mut buf: &[u8] = &[0; 15];
        assert_eq!(RequestId::try_deser(&mut buf), Err(DecodeError::Truncated));
    }
}

//! Hierarchical node addresses.
//!
//! A node is addressed by the path of local addresses from the interface
//! down to the node: up to four non-zero bytes. On the wire the path is
//! written as an address stack terminated by `0x00`; the interface itself
//! (the root) is the empty path and serializes to a single `0x00`.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Maximum number of non-zero components in an address.
pub const MAX_ADDRESS_DEPTH: usize = 4;

/// Address of a node in the control network.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    bytes: [u8; MAX_ADDRESS_DEPTH],
    len: u8,
}

impl NodeAddress {
    /// The interface node.
    pub const ROOT: NodeAddress = NodeAddress {
        bytes: [0; MAX_ADDRESS_DEPTH],
        len: 0,
    };

    pub fn root() -> Self {
        Self::ROOT
    }

    /// Builds an address from its components. Every component must be non-zero.
    pub fn new(components: &[u8]) -> Result<Self, ProtocolError> {
        if components.len() > MAX_ADDRESS_DEPTH {
            return Err(ProtocolError::InvalidAddress(format!(
                "{} components (max {})",
                components.len(),
                MAX_ADDRESS_DEPTH
            )));
        }
        if components.contains(&0) {
            return Err(ProtocolError::InvalidAddress(format!(
                "zero component in {:?}",
                components
            )));
        }
        let mut bytes = [0; MAX_ADDRESS_DEPTH];
        bytes[..components.len()].copy_from_slice(components);
        Ok(Self {
            bytes,
            len: components.len() as u8,
        })
    }

    /// Builds an address from a zero-padded address stack such as
    /// `[1, 2, 0, 0]`. `[0, 0, 0]` is the root.
    pub fn from_stack(stack: &[u8]) -> Result<Self, ProtocolError> {
        let depth = stack.iter().position(|&b| b == 0).unwrap_or(stack.len());
        if stack[depth..].iter().any(|&b| b != 0) {
            return Err(ProtocolError::InvalidAddress(format!(
                "non-zero component after terminator in {:?}",
                stack
            )));
        }
        Self::new(&stack[..depth])
    }

    /// Reads a zero-terminated address stack from the start of `buf`.
    ///
    /// Returns the address and the number of bytes consumed (terminator
    /// included).
    pub fn read_stack(buf: &[u8]) -> Result<(Self, usize), ProtocolError> {
        match buf.iter().take(MAX_ADDRESS_DEPTH + 1).position(|&b| b == 0) {
            Some(depth) => Ok((Self::new(&buf[..depth])?, depth + 1)),
            None if buf.len() > MAX_ADDRESS_DEPTH => Err(ProtocolError::InvalidAddress(
                format!("no terminator within {} bytes", MAX_ADDRESS_DEPTH + 1),
            )),
            None => Err(ProtocolError::Truncated {
                needed: buf.len() + 1,
                available: buf.len(),
            }),
        }
    }

    /// Returns the address components (empty for the root).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn depth(&self) -> usize {
        self.len as usize
    }

    pub fn is_root(&self) -> bool {
        self.len == 0
    }

    /// Returns whether `self` is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &NodeAddress) -> bool {
        other.as_bytes().starts_with(self.as_bytes())
    }

    /// Returns whether `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &NodeAddress) -> bool {
        self.len < other.len && self.is_prefix_of(other)
    }

    pub fn parent(&self) -> Option<NodeAddress> {
        if self.is_root() {
            return None;
        }
        let mut parent = *self;
        parent.len -= 1;
        parent.bytes[parent.len as usize] = 0;
        Some(parent)
    }

    /// Returns the address of the child with local address `local`.
    pub fn child(&self, local: u8) -> Result<NodeAddress, ProtocolError> {
        let mut components = self.as_bytes().to_vec();
        components.push(local);
        Self::new(&components)
    }

    /// Number of bytes the address stack occupies on the wire.
    pub fn stack_len(&self) -> usize {
        self.len as usize + 1
    }

    /// Writes the address stack, terminator included.
    pub fn serialize_into(&self, out: &mut BytesMut) {
        out.put_slice(self.as_bytes());
        out.put_u8(0);
    }

    /// Returns the wire form of the address stack.
    pub fn to_stack_bytes(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(self.stack_len());
        self.serialize_into(&mut out);
        out.to_vec()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "0");
        }
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddress({})", self)
    }
}

impl FromStr for NodeAddress {
    type Err = ProtocolError;

    /// Parses dotted components, e.g. `1.2.3`. `0` or an empty string is the root.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "0" {
            return Ok(Self::ROOT);
        }
        let components = s
            .split('.')
            .map(|part| {
                part.trim()
                    .parse::<u8>()
                    .map_err(|_| ProtocolError::InvalidAddress(s.to_string()))
            })
            .collect::<Result<Vec<u8>, _>>()?;
        Self::new(&components)
    }
}

impl Serialize for NodeAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_serializes_to_single_zero() {
        let root = NodeAddress::from_stack(&[0, 0, 0]).unwrap();
        assert!(root.is_root());
        assert_eq!(root, NodeAddress::ROOT);
        assert_eq!(root.to_stack_bytes(), vec![0x00]);
        assert_eq!(root.stack_len(), 1);
    }

    #[test]
    fn test_serialize_nested() {
        let addr = NodeAddress::from_stack(&[1, 2, 0, 0]).unwrap();
        assert_eq!(addr.as_bytes(), &[1, 2]);
        assert_eq!(addr.to_stack_bytes(), vec![1, 2, 0]);
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(NodeAddress::new(&[1, 2, 3, 4, 5]).is_err());
        assert!(NodeAddress::new(&[1, 0]).is_err());
        assert!(NodeAddress::from_stack(&[0, 5, 0]).is_err());
    }

    #[test]
    fn test_prefix_relations() {
        let root = NodeAddress::ROOT;
        let a: NodeAddress = "1".parse().unwrap();
        let ab: NodeAddress = "1.2".parse().unwrap();
        let c: NodeAddress = "3".parse().unwrap();

        assert!(root.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&a));
        assert!(!a.is_ancestor_of(&a));
        assert!(a.is_ancestor_of(&ab));
        assert!(!c.is_prefix_of(&ab));
        assert!(!ab.is_prefix_of(&a));
    }

    #[test]
    fn test_parent_and_child() {
        let ab: NodeAddress = "1.2".parse().unwrap();
        assert_eq!(ab.parent().unwrap().to_string(), "1");
        assert_eq!(ab.parent().unwrap().parent().unwrap(), NodeAddress::ROOT);
        assert!(NodeAddress::ROOT.parent().is_none());
        assert_eq!(ab.child(7).unwrap().to_string(), "1.2.7");
        assert_eq!(ab.depth(), 2);
        assert_eq!(ab.child(7).unwrap().depth(), 3);
        assert_eq!(NodeAddress::ROOT.depth(), 0);
        assert!(ab.child(0).is_err());
    }

    #[test]
    fn test_read_stack() {
        let (addr, used) = NodeAddress::read_stack(&[4, 9, 0, 0x11, 0x01]).unwrap();
        assert_eq!(addr.as_bytes(), &[4, 9]);
        assert_eq!(used, 3);

        let (addr, used) = NodeAddress::read_stack(&[0, 0x11]).unwrap();
        assert!(addr.is_root());
        assert_eq!(used, 1);

        assert!(matches!(
            NodeAddress::read_stack(&[1, 2]),
            Err(ProtocolError::Truncated { .. })
        ));
        assert!(matches!(
            NodeAddress::read_stack(&[1, 2, 3, 4, 5, 0]),
            Err(ProtocolError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(NodeAddress::ROOT.to_string(), "0");
        let addr: NodeAddress = "1.20.3".parse().unwrap();
        assert_eq!(addr.to_string(), "1.20.3");
        assert!("1.x".parse::<NodeAddress>().is_err());
        assert!("1.256".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let addr: NodeAddress = "2.5".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"2.5\"");
        let parsed: NodeAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, addr);
    }
}

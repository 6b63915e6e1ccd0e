//! HID report descriptor scanning.
//!
//! Eligibility of a `hidraw` node is decided by the top-level application
//! usages its report descriptor declares. Only the items needed for that are
//! interpreted: `Usage Page` (global), `Usage` (local), `Collection` and
//! `End Collection` (main). Everything else, including long items, is
//! skipped by size.

use touchkey_core::constants::{FIDO_USAGE_CTAPHID, FIDO_USAGE_PAGE};

const ITEM_TYPE_MAIN: u8 = 0;
const ITEM_TYPE_GLOBAL: u8 = 1;
const ITEM_TYPE_LOCAL: u8 = 2;

const TAG_MAIN_COLLECTION: u8 = 0xA;
const TAG_MAIN_END_COLLECTION: u8 = 0xC;
const TAG_GLOBAL_USAGE_PAGE: u8 = 0x0;
const TAG_LOCAL_USAGE: u8 = 0x0;

const LONG_ITEM_PREFIX: u8 = 0xFE;

/// A `(usage page, usage)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Usage {
    pub page: u16,
    pub id: u16,
}

impl Usage {
    pub const FIDO_CTAPHID: Self = Self {
        page: FIDO_USAGE_PAGE,
        id: FIDO_USAGE_CTAPHID,
    };
}

/// Usages attached to top-level collections, in declaration order.
///
/// Malformed trailing bytes end the scan; usages found before them are kept.
pub fn top_level_usages(descriptor: &[u8]) -> Vec<Usage> {
    let mut usages = Vec::new();
    let mut usage_page: u16 = 0;
    let mut pending: Vec<Usage> = Vec::new();
    let mut depth: usize = 0;
    let mut pos = 0;

    while pos < descriptor.len() {
        let prefix = descriptor[pos];

        if prefix == LONG_ITEM_PREFIX {
            let Some(&size) = descriptor.get(pos + 1) else {
                break;
            };
            pos += 3 + usize::from(size);
            continue;
        }

        let size = match prefix & 0x03 {
            3 => 4,
            n => usize::from(n),
        };
        let item_type = (prefix >> 2) & 0x03;
        let tag = prefix >> 4;

        let Some(data) = descriptor.get(pos + 1..pos + 1 + size) else {
            break;
        };
        let value = data
            .iter()
            .rev()
            .fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte));

        match (item_type, tag) {
            (ITEM_TYPE_GLOBAL, TAG_GLOBAL_USAGE_PAGE) => usage_page = value as u16,
            (ITEM_TYPE_LOCAL, TAG_LOCAL_USAGE) => {
                // A four byte usage carries its own page in the high word.
                let usage = if size == 4 {
                    Usage {
                        page: (value >> 16) as u16,
                        id: value as u16,
                    }
                } else {
                    Usage {
                        page: usage_page,
                        id: value as u16,
                    }
                };
                pending.push(usage);
            }
            (ITEM_TYPE_MAIN, TAG_MAIN_COLLECTION) => {
                if depth == 0 {
                    usages.extend(pending.iter().copied());
                }
                depth += 1;
                pending.clear();
            }
            (ITEM_TYPE_MAIN, TAG_MAIN_END_COLLECTION) => {
                depth = depth.saturating_sub(1);
                pending.clear();
            }
            (ITEM_TYPE_MAIN, _) => pending.clear(),
            _ => {}
        }

        pos += 1 + size;
    }

    usages
}

/// Whether the descriptor declares the FIDO CTAPHID application collection.
///
/// ```
/// use touchkey_protocol::descriptor::is_fido_descriptor;
///
/// // Usage Page (0xF1D0), Usage (0x01), Collection (Application), End Collection
/// let descriptor = [0x06, 0xD0, 0xF1, 0x09, 0x01, 0xA1, 0x01, 0xC0];
/// assert!(is_fido_descriptor(&descriptor));
/// ```
pub fn is_fido_descriptor(descriptor: &[u8]) -> bool {
    top_level_usages(descriptor).contains(&Usage::FIDO_CTAPHID)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Report descriptor of a typical FIDO authenticator.
    const FIDO_DESCRIPTOR: &[u8] = &[
        0x06, 0xD0, 0xF1, // Usage Page (FIDO Alliance)
        0x09, 0x01, // Usage (CTAPHID)
        0xA1, 0x01, // Collection (Application)
        0x09, 0x20, //   Usage (Input Report Data)
        0x15, 0x00, //   Logical Minimum (0)
        0x26, 0xFF, 0x00, //   Logical Maximum (255)
        0x75, 0x08, //   Report Size (8)
        0x95, 0x40, //   Report Count (64)
        0x81, 0x02, //   Input (Data,Var,Abs)
        0x09, 0x21, //   Usage (Output Report Data)
        0x15, 0x00, //   Logical Minimum (0)
        0x26, 0xFF, 0x00, //   Logical Maximum (255)
        0x75, 0x08, //   Report Size (8)
        0x95, 0x40, //   Report Count (64)
        0x91, 0x02, //   Output (Data,Var,Abs)
        0xC0, // End Collection
    ];

    /// Boot keyboard descriptor prefix.
    const KEYBOARD_DESCRIPTOR: &[u8] = &[
        0x05, 0x01, // Usage Page (Generic Desktop)
        0x09, 0x06, // Usage (Keyboard)
        0xA1, 0x01, // Collection (Application)
        0x05, 0x07, //   Usage Page (Keyboard)
        0x19, 0xE0, //   Usage Minimum
        0x29, 0xE7, //   Usage Maximum
        0x81, 0x02, //   Input
        0xC0, // End Collection
    ];

    #[test]
    fn test_fido_descriptor() {
        assert!(is_fido_descriptor(FIDO_DESCRIPTOR));
        assert_eq!(top_level_usages(FIDO_DESCRIPTOR), vec![Usage::FIDO_CTAPHID]);
    }

    #[test]
    fn test_keyboard_descriptor() {
        assert!(!is_fido_descriptor(KEYBOARD_DESCRIPTOR));
        assert_eq!(
            top_level_usages(KEYBOARD_DESCRIPTOR),
            vec![Usage { page: 0x01, id: 0x06 }]
        );
    }

    #[test]
    fn test_composite_descriptor() {
        let mut descriptor = KEYBOARD_DESCRIPTOR.to_vec();
        descriptor.extend_from_slice(FIDO_DESCRIPTOR);
        assert!(is_fido_descriptor(&descriptor));
    }

    #[test]
    fn test_nested_fido_usage_is_not_top_level() {
        let descriptor = [
            0x05, 0x01, // Usage Page (Generic Desktop)
            0x09, 0x02, // Usage (Mouse)
            0xA1, 0x01, // Collection (Application)
            0x06, 0xD0, 0xF1, //   Usage Page (FIDO Alliance)
            0x09, 0x01, //   Usage (CTAPHID)
            0xA1, 0x00, //   Collection (Physical)
            0xC0, //   End Collection
            0xC0, // End Collection
        ];
        assert!(!is_fido_descriptor(&descriptor));
    }

    #[test]
    fn test_extended_usage() {
        // Usage with a four byte value: page 0xF1D0, usage 0x0001.
        let descriptor = [0x0B, 0x01, 0x00, 0xD0, 0xF1, 0xA1, 0x01, 0xC0];
        assert!(is_fido_descriptor(&descriptor));
    }

    #[test]
    fn test_truncated_descriptor() {
        assert!(!is_fido_descriptor(&[0x06, 0xD0]));
        assert!(!is_fido_descriptor(&[]));
        // Long item without its size byte.
        assert!(!is_fido_descriptor(&[LONG_ITEM_PREFIX]));
    }

    #[test]
    fn test_long_item_is_skipped() {
        let mut descriptor = vec![LONG_ITEM_PREFIX, 0x02, 0xF0, 0xAA, 0xBB];
        descriptor.extend_from_slice(FIDO_DESCRIPTOR);
        assert!(is_fido_descriptor(&descriptor));
    }
}

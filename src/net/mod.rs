//! Network primitives: MAC canonicalization, field validation and
//! local interface discovery.

pub mod interface;
pub mod mac;
pub mod validate;

pub use interface::{
    find_interface_by_name, find_valid_interface, list_valid_interfaces, local_hostname,
    InterfaceInfo,
};
pub use mac::normalize_mac;
pub use validate::{is_valid_hostname, is_valid_ip, is_valid_mac};

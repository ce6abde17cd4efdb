//! # vmarray
//!
//! Append-only arrays whose storage is a single virtual address-space
//! reservation instead of a heap buffer.
//!
//! A [`VirtualArray`] declares its capacity up front and reserves address
//! space for all of it, but physical memory is only committed for pages
//! that elements are actually written to. Elements are never moved or
//! copied on growth, so references to them stay valid until the array is
//! reset or dropped.
//!
//! ```
//! use vmarray::VirtualArray;
//!
//! let names = VirtualArray::with_capacity(3);
//! let a = names.push(String::from("a"));
//! names.push(String::from("b"));
//! assert_eq!(a, "a");
//! assert_eq!(names.len(), 2);
//! ```
//!
//! Commit is platform specific (see [`vm`]): demand paging on Unix, a
//! commit-on-fault exception handler on Windows. Contract violations and
//! OS failures are fatal by default (see [`fatal`]); `try_*` methods return
//! [`VmError`] instead.
#![warn(missing_docs)]
#![allow(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod array;
pub mod error;
pub mod fatal;
pub mod footprint;
pub mod vm;

pub use array::VirtualArray;
pub use error::VmError;
pub use footprint::Footprint;

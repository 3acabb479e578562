//! TLS record buffers in main SRAM
//!
//! TLS 1.3 needs a read buffer for a full 16 KiB record plus header, tag and
//! padding, and a 16 KiB write buffer. Both are too large for the stack of
//! the network task, so they live in statics handed out once per session.

#![allow(unsafe_code)]

/// Maximum TLS 1.3 record (16384) plus header, AEAD tag and padding
const TLS_READ_BUF_SIZE: usize = 18 * 1024;

const TLS_WRITE_BUF_SIZE: usize = 16 * 1024;

static mut TLS_READ_BUF: [u8; TLS_READ_BUF_SIZE] = [0; TLS_READ_BUF_SIZE];
static mut TLS_WRITE_BUF: [u8; TLS_WRITE_BUF_SIZE] = [0; TLS_WRITE_BUF_SIZE];

/// Read and write buffers for one TLS connection
///
/// # Safety
///
/// The returned slices must back at most one live TLS connection, and must
/// not be requested again before that connection is dropped.
pub unsafe fn tls_buffers() -> (&'static mut [u8], &'static mut [u8]) {
    (
        &mut *core::ptr::addr_of_mut!(TLS_READ_BUF),
        &mut *core::ptr::addr_of_mut!(TLS_WRITE_BUF),
    )
}

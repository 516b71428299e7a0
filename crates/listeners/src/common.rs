//! Tuning parameters shared by every listener type.

use relay_config::Options;

/// Default kernel receive buffer request (16 MiB).
pub const DEFAULT_READ_BUFFER: usize = 16_777_216;

/// Default maximum message size (64 KiB).
pub const DEFAULT_MAX_MSG_SIZE: usize = 65_536;

/// Socket tuning knobs every listener understands.
#[derive(Debug, Clone, Copy)]
pub struct ListenerParams {
    /// Requested SO_RCVBUF size
    pub read_buffer: usize,

    /// Largest message accepted; anything bigger is dropped
    pub max_msg_size: usize,
}

impl Default for ListenerParams {
    fn default() -> Self {
        Self {
            read_buffer: DEFAULT_READ_BUFFER,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
        }
    }
}

impl ListenerParams {
    /// Override defaults from instance options.
    pub fn apply(&mut self, options: &Options) {
        if let Some(n) = options.get_as_int("readBuffer") {
            if n > 0 {
                self.read_buffer = n as usize;
            }
        }
        if let Some(n) = options.get_as_int("maxMsgSize") {
            if n > 0 {
                self.max_msg_size = n as usize;
            }
        }
    }
}

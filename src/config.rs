//! Configuration surface (spec §6).

/// Whether a [`crate::MessageService`] creates (`Server`) or opens
/// (`Client`) the named pipe.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    /// Creates the pipe; accepts connecting clients.
    Server,
    /// Opens an existing pipe created by a server.
    Client,
}

/// How many server instances of a pipe name may have a pending accept at
/// once. Mirrors `PIPE_UNLIMITED_INSTANCES` vs. a bounded count on
/// `CreateNamedPipeW`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InstanceLimit {
    Unlimited,
    Bounded(u32),
}

impl Default for InstanceLimit {
    fn default() -> Self {
        InstanceLimit::Unlimited
    }
}

/// Maximum payload a [`crate::codec`] frame may carry, per spec §3/§6.
pub const MAX_MESSAGE_SIZE: usize = 128 * 1024 * 1024;

/// Default per-direction buffer growth chunk, per spec §4.C/§6.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Default client open retry budget, per spec §4.D/§6.
pub const DEFAULT_BUSY_WAIT_TIMEOUT_MS: u32 = 5000;

/// The full configuration surface spec §6 requires an implementation to
/// expose. Built with [`PipeConfig::new`] and the `with_*` setters;
/// every field defaults to the value spec §6 names.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pipe_name: String,
    role: Role,
    default_read_chunk: usize,
    max_message_size: usize,
    busy_wait_timeout_ms: u32,
    server_instance_limit: InstanceLimit,
}

impl PipeConfig {
    pub fn new(pipe_name: impl Into<String>, role: Role) -> PipeConfig {
        PipeConfig {
            pipe_name: pipe_name.into(),
            role,
            default_read_chunk: DEFAULT_READ_CHUNK,
            max_message_size: MAX_MESSAGE_SIZE,
            busy_wait_timeout_ms: DEFAULT_BUSY_WAIT_TIMEOUT_MS,
            server_instance_limit: InstanceLimit::Unlimited,
        }
    }

    pub fn with_read_chunk(mut self, bytes: usize) -> PipeConfig {
        self.default_read_chunk = bytes;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> PipeConfig {
        self.max_message_size = bytes;
        self
    }

    pub fn with_busy_wait_timeout_ms(mut self, ms: u32) -> PipeConfig {
        self.busy_wait_timeout_ms = ms;
        self
    }

    pub fn with_server_instance_limit(mut self, limit: InstanceLimit) -> PipeConfig {
        self.server_instance_limit = limit;
        self
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn default_read_chunk(&self) -> usize {
        self.default_read_chunk
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn busy_wait_timeout_ms(&self) -> u32 {
        self.busy_wait_timeout_ms
    }

    pub fn server_instance_limit(&self) -> InstanceLimit {
        self.server_instance_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = PipeConfig::new(r"\\.\pipe\example", Role::Server);
        assert_eq!(cfg.default_read_chunk(), 4096);
        assert_eq!(cfg.max_message_size(), 128 * 1024 * 1024);
        assert_eq!(cfg.busy_wait_timeout_ms(), 5000);
        assert_eq!(cfg.server_instance_limit(), InstanceLimit::Unlimited);
        assert_eq!(cfg.role(), Role::Server);
        assert_eq!(cfg.pipe_name(), r"\\.\pipe\example");
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = PipeConfig::new("name", Role::Client)
            .with_read_chunk(8192)
            .with_max_message_size(1024)
            .with_busy_wait_timeout_ms(250)
            .with_server_instance_limit(InstanceLimit::Bounded(4));
        assert_eq!(cfg.default_read_chunk(), 8192);
        assert_eq!(cfg.max_message_size(), 1024);
        assert_eq!(cfg.busy_wait_timeout_ms(), 250);
        assert_eq!(cfg.server_instance_limit(), InstanceLimit::Bounded(4));
    }
}

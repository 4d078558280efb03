pub mod server;

/// Actions the CLI can dispatch to.
#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        frontend_base_url: String,
        email_code_ttl_seconds: i64,
        email_code_resend_cooldown_seconds: i64,
        email_outbox_poll_seconds: u64,
        email_outbox_batch_size: usize,
        email_outbox_max_attempts: u32,
        totp_sealing_key: [u8; 32],
        recovery_pepper: Vec<u8>,
    },
}

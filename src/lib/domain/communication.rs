//! Communication with recipients

pub mod email_addresses;
pub mod mailer;

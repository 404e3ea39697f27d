//! `HeaderBuilder`: assemble the outbound AS2 HTTP header set.

use std::collections::HashMap;

use chrono::Utc;

use crate::message::Message;

pub struct HeaderBuilder {
    user_agent: String,
}

impl Default for HeaderBuilder {
    fn default() -> Self {
        HeaderBuilder { user_agent: concat!("as2send/", env!("CARGO_PKG_VERSION")).to_string() }
    }
}

impl HeaderBuilder {
    pub fn new(user_agent: impl Into<String>) -> Self {
        HeaderBuilder { user_agent: user_agent.into() }
    }

    /// Build the full outbound header map for `message`. Calling this twice
    /// for the same message produces byte-identical maps
    /// because it only reads from `message`, never mutates global state.
    pub fn build(&self, message: &Message) -> HashMap<String, String> {
        let mut headers = message.headers.clone();
        let quote = message.partnership.quote_header_values;

        let set = |headers: &mut HashMap<String, String>, name: &str, value: String| {
            // `quote_header_values` forces quoting everywhere; otherwise only
            // values that actually need it (commas, spaces) get quoted.
            let value = if quote || needs_quoting(&value) { quote_value(&value) } else { value };
            headers.insert(name.to_string(), value);
        };

        set(&mut headers, "Connection", "close".to_string());
        set(&mut headers, "User-Agent", self.user_agent.clone());
        set(&mut headers, "Mime-Version", "1.0".to_string());
        set(&mut headers, "AS2-Version", "1.1".to_string());
        set(&mut headers, "Date", Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string());
        set(&mut headers, "Message-ID", message.message_id.clone());
        set(&mut headers, "Content-Type", message.content_type.clone());
        set(&mut headers, "Recipient-Address", message.partnership.as2_url.clone());
        set(&mut headers, "AS2-From", message.partnership.sender_as2_id.clone());
        set(&mut headers, "AS2-To", message.partnership.receiver_as2_id.clone());
        set(&mut headers, "Subject", message.subject.clone());
        set(&mut headers, "From", message.sender_email.clone());
        set(
            &mut headers,
            "Content-Transfer-Encoding",
            message.partnership.content_transfer_encoding.clone(),
        );

        if let Some(to) = &message.partnership.disposition_notification_to {
            set(&mut headers, "Disposition-Notification-To", to.clone());
        }
        if let Some(options) = &message.partnership.mdn_options {
            set(&mut headers, "Disposition-Notification-Options", options.clone());
        }
        if let crate::message::MdnMode::Async { receipt_delivery_url } = &message.partnership.mdn_mode {
            set(&mut headers, "Receipt-Delivery-Option", receipt_delivery_url.clone());
        }
        if let Some(disposition) = headers.get("Content-Disposition").cloned() {
            set(&mut headers, "Content-Disposition", disposition);
        }

        headers
    }
}

fn needs_quoting(value: &str) -> bool {
    value.contains(',') || value.contains(' ')
}

fn quote_value(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('"', "\\\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MdnMode, Partnership};
    use crate::mime::MimeContainer;
    use std::sync::Arc;

    fn test_partnership(quote: bool) -> Arc<Partnership> {
        Arc::new(Partnership {
            sender_as2_id: "SenderAS2".into(),
            receiver_as2_id: "Receiver, AS2".into(),
            as2_url: "https://partner.example/as2".into(),
            sign_algorithm: None,
            encrypt_algorithm: None,
            compression: None,
            compress_before_sign: false,
            mdn_mode: MdnMode::None,
            mdn_options: None,
            disposition_notification_to: None,
            content_transfer_encoding: "binary".into(),
            sender_key_alias: None,
            receiver_cert_alias: None,
            include_certificate_in_signed_content: false,
            use_rfc3851_mic_names: false,
            quote_header_values: quote,
            retry_count: 0,
        })
    }

    fn test_message() -> Message {
        Message::new(
            "<abc@host>".into(),
            "Test subject".into(),
            "sender@example.com".into(),
            "application/octet-stream".into(),
            MimeContainer::single_part("application/octet-stream".into(), "binary", b"hello"),
            test_partnership(true),
        )
    }

    #[test]
    fn header_build_is_idempotent() {
        let builder = HeaderBuilder::default();
        let msg = test_message();
        let a = builder.build(&msg);
        let b = builder.build(&msg);
        assert_eq!(a, b);
    }

    #[test]
    fn comma_bearing_identifier_gets_quoted() {
        let builder = HeaderBuilder::default();
        let msg = test_message();
        let headers = builder.build(&msg);
        assert_eq!(headers.get("AS2-To").unwrap(), "\"Receiver, AS2\"");
    }

    #[test]
    fn async_mode_sets_receipt_delivery_option() {
        let builder = HeaderBuilder::default();
        let mut partnership = (*test_partnership(false)).clone();
        partnership.mdn_mode = MdnMode::Async { receipt_delivery_url: "https://partner.example/mdn".into() };
        let mut msg = test_message();
        msg.partnership = Arc::new(partnership);
        let headers = builder.build(&msg);
        assert_eq!(headers.get("Receipt-Delivery-Option").unwrap(), "https://partner.example/mdn");
    }
}

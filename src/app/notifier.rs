use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;

#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, email: &Email) -> anyhow::Result<()>;
}

/// Writes emails to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, email: &Email) -> anyhow::Result<()> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "email (log only)"
        );
        Ok(())
    }
}

/// Posts emails to a JSON mail API (Resend-style payload).
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    from: String,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
            from: from.into(),
        }
    }

    fn payload(&self, email: &Email) -> serde_json::Value {
        let attachments: Vec<_> = email
            .attachments
            .iter()
            .map(|a| {
                serde_json::json!({
                    "filename": a.file_name,
                    "contentType": a.content_type,
                    "content": base64::engine::general_purpose::STANDARD.encode(&a.bytes),
                })
            })
            .collect();
        serde_json::json!({
            "from": self.from,
            "to": [email.to],
            "subject": email.subject,
            "text": email.body,
            "attachments": attachments,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_email(&self, email: &Email) -> anyhow::Result<()> {
        let mut request = self.client.post(&self.endpoint).json(&self.payload(email));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("mail API error ({status}): {body}");
        }
        tracing::info!(to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachments_are_base64_encoded() {
        let notifier = HttpNotifier::new("http://mail.local/emails", None, "Bookforge <no@x.y>");
        let payload = notifier.payload(&Email {
            to: "a@b.com".to_owned(),
            subject: "Seu livro".to_owned(),
            body: "Segue anexo.".to_owned(),
            attachments: vec![Attachment {
                file_name: "livro.docx".to_owned(),
                content_type: "application/octet-stream".to_owned(),
                bytes: b"hello".to_vec(),
            }],
        });
        assert_eq!(payload["to"][0], "a@b.com");
        assert_eq!(payload["attachments"][0]["content"], "aGVsbG8=");
        assert_eq!(payload["attachments"][0]["filename"], "livro.docx");
    }
}

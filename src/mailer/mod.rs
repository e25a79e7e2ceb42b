use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use crate::config::EmailConfig;
use crate::digest::DigestDocument;
use crate::models::Subscriber;
use crate::newsletter;
use crate::utils::{MedDigestError, MedDigestResult};

/// 邮件发送；失败只记录日志并返回 false
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> bool;
}

pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    async fn deliver(&self, to: &str, subject: &str, body: &str) -> MedDigestResult<()> {
        let email = Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| MedDigestError::EmailError(format!("发件地址无效: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| MedDigestError::EmailError(format!("收件地址无效 {}: {}", to, e)))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| MedDigestError::EmailError(format!("构建邮件失败: {}", e)))?;

        let credentials = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
            .map_err(|e| MedDigestError::EmailError(format!("SMTP 连接配置错误: {}", e)))?
            .port(self.config.smtp_port)
            .credentials(credentials)
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| MedDigestError::EmailError(format!("SMTP 发送失败: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> bool {
        match self.deliver(to, subject, body).await {
            Ok(()) => {
                info!("邮件已发送: {}", to);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}

/// 逐个收件人发送，返回成功数
pub async fn send_newsletter(
    sender: &dyn EmailSender,
    recipients: &[String],
    subject: &str,
    body: &str,
) -> usize {
    let mut delivered = 0;
    for recipient in recipients {
        if sender.send(recipient, subject, body).await {
            delivered += 1;
        }
    }
    info!("简报邮件发送完成: {}/{}", delivered, recipients.len());
    delivered
}

/// 向订阅者逐个发送个性化邮件，正文前附上各自关注专科的研究重点；返回成功数
pub async fn send_personalized(
    sender: &dyn EmailSender,
    subscribers: &[Subscriber],
    doc: Option<&DigestDocument>,
    subject: &str,
    body: &str,
) -> usize {
    let mut delivered = 0;
    for subscriber in subscribers {
        let personalized = newsletter::render_personalized(doc, subscriber, body);
        if sender.send(&subscriber.email, subject, &personalized).await {
            delivered += 1;
        }
    }
    info!("订阅邮件发送完成: {}/{}", delivered, subscribers.len());
    delivered
}

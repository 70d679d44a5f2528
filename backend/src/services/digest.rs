//! Daily digest
//!
//! Builds the morning email listing the user's current-quarter objectives
//! with key result progress and a one-click login link, and hands it to a
//! `Mailer`. Delivery failures are logged and never propagate.

use crate::database::User;
use crate::error::Result;
use crate::services::auth::{verify_path, MagicLinkService};
use crate::services::objectives::quarter_of;
use crate::storage::Store;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::sync::Arc;

/// Outbound delivery for rendered digests
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, digest: &Digest) -> Result<()>;
}

/// Mailer that writes the digest to the log instead of sending it
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, digest: &Digest) -> Result<()> {
        tracing::info!(
            to = %digest.to,
            subject = %digest.subject,
            objectives = digest.objectives.len(),
            "Daily digest"
        );
        tracing::debug!("{}", digest.html);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestKeyResult {
    pub description: String,
    /// Percent towards target; absent for binary key results
    pub progress: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestObjective {
    pub title: String,
    pub key_results: Vec<DigestKeyResult>,
}

/// A rendered digest ready for delivery
#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub user_id: String,
    pub to: String,
    pub subject: String,
    pub date_label: String,
    pub quarter: i64,
    pub year: i64,
    pub login_link: String,
    pub objectives: Vec<DigestObjective>,
    pub html: String,
}

#[derive(Clone)]
pub struct DigestService {
    store: Arc<dyn Store>,
    links: MagicLinkService,
    mailer: Arc<dyn Mailer>,
    app_url: String,
}

impl DigestService {
    pub fn new(
        store: Arc<dyn Store>,
        links: MagicLinkService,
        mailer: Arc<dyn Mailer>,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            links,
            mailer,
            app_url: app_url.into(),
        }
    }

    /// Build the digest for today's date on the server clock
    pub async fn build_digest(&self, user_id: &str) -> Result<Digest> {
        self.build_digest_on(user_id, Local::now().date_naive()).await
    }

    /// Build the digest as of the calendar day `today`.
    ///
    /// Issues a fresh login link on every call.
    pub async fn build_digest_on(&self, user_id: &str, today: NaiveDate) -> Result<Digest> {
        let user = self.store.get_user(user_id).await?;
        let (quarter, year) = quarter_of(today);

        let mut objectives = Vec::new();
        for objective in self
            .store
            .list_current_objectives(user_id, quarter, year)
            .await?
        {
            let key_results = self
                .store
                .list_key_results(&objective.id)
                .await?
                .into_iter()
                .map(|kr| DigestKeyResult {
                    progress: kr.progress(),
                    description: kr.description,
                })
                .collect();
            objectives.push(DigestObjective {
                title: objective.title,
                key_results,
            });
        }

        let link = self.links.issue(user_id).await?;
        let login_link = format!("{}{}", self.app_url, verify_path(&link.token));

        Ok(render(&user, today, quarter, year, login_link, objectives))
    }

    /// Hand a digest to the mailer. Returns whether delivery succeeded.
    pub async fn dispatch(&self, digest: &Digest) -> bool {
        match self.mailer.send(digest).await {
            Ok(()) => {
                tracing::info!("Digest delivered to user {}", digest.user_id);
                true
            }
            Err(e) => {
                tracing::error!("Failed to deliver digest to user {}: {}", digest.user_id, e);
                false
            }
        }
    }

    /// Build and dispatch immediately
    pub async fn send_now(&self, user_id: &str) -> Result<Digest> {
        self.send_on(user_id, Local::now().date_naive()).await
    }

    pub async fn send_on(&self, user_id: &str, today: NaiveDate) -> Result<Digest> {
        let digest = self.build_digest_on(user_id, today).await?;
        self.dispatch(&digest).await;
        Ok(digest)
    }
}

fn render(
    user: &User,
    today: NaiveDate,
    quarter: i64,
    year: i64,
    login_link: String,
    objectives: Vec<DigestObjective>,
) -> Digest {
    let date_label = today.format("%A, %B %-d, %Y").to_string();
    let subject = format!("Good morning! Here are your goals for Q{} {}", quarter, year);
    let html = render_html(&objectives, quarter, year, &login_link, &date_label);

    Digest {
        user_id: user.id.clone(),
        to: user.email.clone(),
        subject,
        date_label,
        quarter,
        year,
        login_link,
        objectives,
        html,
    }
}

fn render_html(
    objectives: &[DigestObjective],
    quarter: i64,
    year: i64,
    login_link: &str,
    date_label: &str,
) -> String {
    let mut body = String::new();

    if objectives.is_empty() {
        body.push_str(
            r#"<p style="color: #666;">No OKRs set for this quarter. Click below to create some!</p>"#,
        );
    }

    for objective in objectives {
        body.push_str(&format!(
            r#"<div style="margin-bottom: 20px;"><h3 style="margin: 10px 0; color: #2c3e50;">{}</h3>"#,
            escape_html(&objective.title)
        ));
        for kr in &objective.key_results {
            let progress = kr
                .progress
                .map(|p| format!(r#" <span style="color: #27ae60;">(Progress: {}%)</span>"#, p))
                .unwrap_or_default();
            body.push_str(&format!(
                r#"<div style="margin-left: 20px; margin-bottom: 5px;">&bull; {}{}</div>"#,
                escape_html(&kr.description),
                progress
            ));
        }
        body.push_str("</div>");
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
  <div style="background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 30px; border-radius: 10px 10px 0 0; text-align: center;">
    <h1 style="margin: 0; font-size: 24px;">Good morning!</h1>
    <p style="margin: 10px 0 0 0; font-size: 18px;">Here are your goals for Q{quarter} {year}</p>
  </div>
  <div style="background: white; padding: 30px; border: 1px solid #e0e0e0; border-top: none; border-radius: 0 0 10px 10px;">
    <p style="color: #666; margin-top: 0;">{date_label}</p>
    <h2 style="color: #2c3e50; border-bottom: 2px solid #667eea; padding-bottom: 10px;">Your Objectives:</h2>
    {body}
    <div style="text-align: center; margin: 40px 0 20px 0;">
      <a href="{link}" style="display: inline-block; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 15px 40px; text-decoration: none; border-radius: 25px; font-size: 18px; font-weight: 600;">What are you going to do today? &rarr;</a>
    </div>
    <div style="text-align: center; margin-top: 30px; padding-top: 20px; border-top: 1px solid #e0e0e0; color: #999; font-size: 12px;">
      <p>This link expires in 24 hours</p>
    </div>
  </div>
</body>
</html>
"#,
        quarter = quarter,
        year = year,
        date_label = date_label,
        body = body,
        link = escape_html(login_link),
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

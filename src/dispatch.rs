use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use serde::Serialize;
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::{MINUTE_MS, Ms};

/// Failure of an outside collaborator. Never reaches the booking caller.
#[derive(Debug)]
pub enum CollaboratorError {
    Http(String),
    Rejected { status: u16, body: String },
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollaboratorError::Http(e) => write!(f, "request failed: {e}"),
            CollaboratorError::Rejected { status, body } => {
                write!(f, "rejected with status {status}: {body}")
            }
        }
    }
}

impl std::error::Error for CollaboratorError {}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        CollaboratorError::Http(e.to_string())
    }
}

/// Everything the client-facing confirmation message needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingConfirmation {
    pub appointment_id: Ulid,
    pub client_name: String,
    pub client_email: Option<String>,
    pub service_name: String,
    pub professional_name: Option<String>,
    pub starts_at: Ms,
    pub ends_at: Ms,
    pub location: Option<String>,
}

impl BookingConfirmation {
    /// Render an iCalendar invitation with a one-hour reminder.
    pub fn to_ics(&self) -> String {
        let summary = escape_text(&self.service_name);
        let mut description = format!("Service: {}", self.service_name);
        if let Some(p) = &self.professional_name {
            description.push_str(&format!("\nProfessional: {p}"));
        }

        let mut lines = vec![
            "BEGIN:VCALENDAR".to_string(),
            "VERSION:2.0".to_string(),
            "PRODID:-//salonbook//booking//EN".to_string(),
            "CALSCALE:GREGORIAN".to_string(),
            "METHOD:REQUEST".to_string(),
            "BEGIN:VEVENT".to_string(),
            format!("UID:{}@salonbook", self.appointment_id),
            format!("DTSTART:{}", ics_timestamp(self.starts_at)),
            format!("DTEND:{}", ics_timestamp(self.ends_at)),
            format!("SUMMARY:{summary}"),
            format!("DESCRIPTION:{}", escape_text(&description)),
        ];
        if let Some(location) = &self.location {
            lines.push(format!("LOCATION:{}", escape_text(location)));
        }
        lines.extend([
            "STATUS:CONFIRMED".to_string(),
            "SEQUENCE:0".to_string(),
            "BEGIN:VALARM".to_string(),
            "TRIGGER:-PT60M".to_string(),
            "ACTION:DISPLAY".to_string(),
            format!("DESCRIPTION:Reminder: {summary} in 1 hour"),
            "END:VALARM".to_string(),
            "END:VEVENT".to_string(),
            "END:VCALENDAR".to_string(),
        ]);

        let mut out = lines.join("\r\n");
        out.push_str("\r\n");
        out
    }
}

/// A staff calendar entry for a confirmed appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEvent {
    pub appointment_id: Ulid,
    pub subject_name: String,
    pub service_name: String,
    pub starts_at: Ms,
    pub duration_minutes: u32,
}

impl CalendarEvent {
    pub fn ends_at(&self) -> Ms {
        self.starts_at + self.duration_minutes as Ms * MINUTE_MS
    }

    pub fn summary(&self) -> String {
        format!("{} - {}", self.service_name, self.subject_name)
    }
}

fn ics_timestamp(at: Ms) -> String {
    match DateTime::from_timestamp_millis(at) {
        Some(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
        None => "19700101T000000Z".to_string(),
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_booking_confirmation(
        &self,
        confirmation: &BookingConfirmation,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait CalendarSink: Send + Sync {
    async fn create_calendar_event(&self, event: &CalendarEvent) -> Result<(), CollaboratorError>;
}

/// Logs instead of delivering. The default when no URLs are configured.
pub struct LogDispatch;

#[async_trait]
impl Notifier for LogDispatch {
    async fn send_booking_confirmation(
        &self,
        confirmation: &BookingConfirmation,
    ) -> Result<(), CollaboratorError> {
        info!(
            appointment = %confirmation.appointment_id,
            client = %confirmation.client_name,
            service = %confirmation.service_name,
            "booking confirmation"
        );
        Ok(())
    }
}

#[async_trait]
impl CalendarSink for LogDispatch {
    async fn create_calendar_event(&self, event: &CalendarEvent) -> Result<(), CollaboratorError> {
        info!(
            appointment = %event.appointment_id,
            summary = %event.summary(),
            minutes = event.duration_minutes,
            "calendar event"
        );
        Ok(())
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<(), CollaboratorError> {
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(CollaboratorError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

/// Posts the confirmation and its `.ics` attachment as JSON.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_booking_confirmation(
        &self,
        confirmation: &BookingConfirmation,
    ) -> Result<(), CollaboratorError> {
        let body = serde_json::json!({
            "appointment_id": confirmation.appointment_id.to_string(),
            "client_name": confirmation.client_name,
            "client_email": confirmation.client_email,
            "service_name": confirmation.service_name,
            "professional_name": confirmation.professional_name,
            "start_time": rfc3339(confirmation.starts_at),
            "end_time": rfc3339(confirmation.ends_at),
            "attachment": {
                "filename": "appointment.ics",
                "content_type": "text/calendar",
                "content": confirmation.to_ics(),
            },
        });
        post_json(&self.client, &self.url, &body).await
    }
}

pub struct WebhookCalendar {
    url: String,
    client: reqwest::Client,
}

impl WebhookCalendar {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl CalendarSink for WebhookCalendar {
    async fn create_calendar_event(&self, event: &CalendarEvent) -> Result<(), CollaboratorError> {
        let body = serde_json::json!({
            "summary": event.summary(),
            "description": format!("{} for {}", event.service_name, event.subject_name),
            "start_time": rfc3339(event.starts_at),
            "end_time": rfc3339(event.ends_at()),
        });
        post_json(&self.client, &self.url, &body).await
    }
}

fn rfc3339(at: Ms) -> String {
    DateTime::from_timestamp_millis(at)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Runs the confirmation side effects. Failures are logged and counted,
/// never returned.
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    calendar: Arc<dyn CalendarSink>,
    location: Option<String>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::logging()
    }
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, calendar: Arc<dyn CalendarSink>) -> Self {
        Self {
            notifier,
            calendar,
            location: None,
        }
    }

    pub fn logging() -> Self {
        let log = Arc::new(LogDispatch);
        Self::new(log.clone(), log)
    }

    /// Webhooks where a URL is given, logging otherwise.
    pub fn from_urls(notify_url: Option<&str>, calendar_url: Option<&str>) -> Self {
        let notifier: Arc<dyn Notifier> = match notify_url {
            Some(url) => Arc::new(WebhookNotifier::new(url)),
            None => Arc::new(LogDispatch),
        };
        let calendar: Arc<dyn CalendarSink> = match calendar_url {
            Some(url) => Arc::new(WebhookCalendar::new(url)),
            None => Arc::new(LogDispatch),
        };
        Self::new(notifier, calendar)
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub async fn on_confirmed(&self, mut confirmation: BookingConfirmation, event: CalendarEvent) {
        if confirmation.location.is_none() {
            confirmation.location = self.location.clone();
        }

        let notify = async {
            if confirmation.client_email.is_none() {
                info!(
                    appointment = %confirmation.appointment_id,
                    "client has no email, skipping confirmation"
                );
                return;
            }
            if let Err(e) = self.notifier.send_booking_confirmation(&confirmation).await {
                warn!(appointment = %confirmation.appointment_id, error = %e, "confirmation email failed");
                metrics::counter!(crate::observability::SIDE_EFFECT_FAILURES_TOTAL, "collaborator" => "notifier")
                    .increment(1);
            }
        };
        let calendar = async {
            if let Err(e) = self.calendar.create_calendar_event(&event).await {
                warn!(appointment = %event.appointment_id, error = %e, "calendar event failed");
                metrics::counter!(crate::observability::SIDE_EFFECT_FAILURES_TOTAL, "collaborator" => "calendar")
                    .increment(1);
            }
        };
        futures::join!(notify, calendar);
    }
}

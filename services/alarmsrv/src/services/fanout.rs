//! Notification fan-out
//!
//! Runs once per newly created event. Every active subscription of the
//! event's alarm yields in-app notifications (at most one per user) and,
//! when enabled, email (at most one per address):
//!
//! - individual subscriptions send one email per recipient
//! - group subscriptions send one email to all not-yet-mailed members
//!
//! Mail failures are logged and never abort the fan-out.

use super::Collaborators;
use crate::config::MailConfig;
use crate::domain::context::{
    alarm_json, device_json, event_json, group_json, user_json, variable_json,
};
use crate::domain::{Alarm, AlarmEvent, GroupId, Subscription, UserId};
use crate::error::{AlarmError, Result};
use crate::mailer::EmailMessage;
use crate::templates::Markup;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, error, warn};
use voltage_formula::Context;

/// Counts produced by one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub notifications: usize,
    /// Emails handed to the sender successfully
    pub emails: usize,
    pub failed_emails: usize,
}

/// State of one fan-out pass
struct Pass<'a> {
    event: &'a AlarmEvent,
    alarm: &'a Alarm,
    /// Context shared by every recipient
    base: Context,
    notified: HashSet<UserId>,
    mailed: HashSet<String>,
    report: FanOutReport,
}

pub struct FanOut {
    collab: Collaborators,
    mail: MailConfig,
}

impl FanOut {
    pub fn new(collab: Collaborators, mail: MailConfig) -> Self {
        Self { collab, mail }
    }

    /// Notify every subscriber of the event's alarm
    pub fn fan_out(&self, event: &AlarmEvent) -> Result<FanOutReport> {
        if event.is_bare() {
            debug!(event = %event, "Event has no device, variable or related object");
            return Ok(FanOutReport::default());
        }

        let alarm = self
            .collab
            .repository
            .alarm(event.alarm)?
            .ok_or_else(|| AlarmError::not_found(format!("alarm {}", event.alarm)))?;
        let mut pass = Pass {
            event,
            alarm: &alarm,
            base: self.base_context(event, &alarm)?,
            notified: HashSet::new(),
            mailed: HashSet::new(),
            report: FanOutReport::default(),
        };

        for sub in self.collab.repository.subscriptions_for_alarm(alarm.id)? {
            if !sub.active {
                continue;
            }
            match (sub.user, sub.group) {
                (Some(user), None) => self.notify_user(&mut pass, &sub, user)?,
                (None, Some(group)) => self.notify_group(&mut pass, &sub, group)?,
                _ => warn!(subscription = sub.id, "Subscription without a single principal"),
            }
        }

        let report = pass.report;
        debug!(
            event = %event,
            notifications = report.notifications,
            emails = report.emails,
            failed = report.failed_emails,
            "Fan-out complete"
        );
        Ok(report)
    }

    fn notify_user(&self, pass: &mut Pass<'_>, sub: &Subscription, user_id: UserId) -> Result<()> {
        let Some(user) = self.collab.directory.user(user_id)? else {
            warn!(subscription = sub.id, user = user_id, "Subscribed user not found");
            return Ok(());
        };
        if !pass.notified.insert(user.id) {
            return Ok(());
        }
        self.collab
            .repository
            .insert_notification(user.id, pass.event.id, self.collab.clock.now())?;
        pass.report.notifications += 1;

        if !sub.email {
            return Ok(());
        }
        let Some(address) = user.email_address() else {
            return Ok(());
        };
        if !pass.mailed.insert(address.to_string()) {
            return Ok(());
        }

        let mut context = pass.base.clone();
        context.insert("user".to_string(), user_json(&user));
        let message = self.compose(pass, sub, &context, vec![address.to_string()]);
        self.deliver(&message, &mut pass.report);
        Ok(())
    }

    fn notify_group(
        &self,
        pass: &mut Pass<'_>,
        sub: &Subscription,
        group_id: GroupId,
    ) -> Result<()> {
        let Some(group) = self.collab.directory.group(group_id)? else {
            warn!(subscription = sub.id, group = group_id, "Subscribed group not found");
            return Ok(());
        };

        let mut recipients = Vec::new();
        for member in self.collab.directory.group_members(group.id)? {
            if pass.notified.insert(member.id) {
                self.collab
                    .repository
                    .insert_notification(member.id, pass.event.id, self.collab.clock.now())?;
                pass.report.notifications += 1;
            }
            if sub.email {
                if let Some(address) = member.email_address() {
                    if pass.mailed.insert(address.to_string()) {
                        recipients.push(address.to_string());
                    }
                }
            }
        }

        if recipients.is_empty() {
            return Ok(());
        }
        let mut context = pass.base.clone();
        context.insert("user".to_string(), group_json(&group));
        let message = self.compose(pass, sub, &context, recipients);
        self.deliver(&message, &mut pass.report);
        Ok(())
    }

    /// Context shared by every recipient of one event
    fn base_context(&self, event: &AlarmEvent, alarm: &Alarm) -> Result<Context> {
        let registry = &self.collab.registry;

        let device = match event.device {
            Some(id) => match registry.device(id)? {
                Some(device) => {
                    let profile = match device.profile {
                        Some(p) => registry.profile(p)?,
                        None => None,
                    };
                    device_json(&device, profile.as_ref())
                },
                None => Value::Null,
            },
            None => Value::Null,
        };
        let var = match event.variable {
            Some(id) => registry
                .variable(id)?
                .map(|v| variable_json(&v, Some(device.clone())))
                .unwrap_or(Value::Null),
            None => Value::Null,
        };
        let view = event_json(event);

        let mut context = Context::new();
        context.insert("content_type".to_string(), view["related"].clone());
        context.insert("event".to_string(), view);
        context.insert("alarm".to_string(), alarm_json(alarm));
        context.insert("device".to_string(), device);
        context.insert("var".to_string(), var);
        Ok(context)
    }

    fn compose(
        &self,
        pass: &Pass<'_>,
        sub: &Subscription,
        context: &Context,
        to: Vec<String>,
    ) -> EmailMessage {
        let templates = &self.collab.templates;
        let event = pass.event;

        let body = templates
            .render_named(&self.mail.plain_template, Markup::Plain, context)
            .unwrap_or_else(|e| {
                warn!(
                    template = %self.mail.plain_template,
                    error = %e,
                    "Plain template failed, using built-in body"
                );
                fallback_body(event, pass.alarm)
            });

        let html = sub.template_source().and_then(|source| {
            templates
                .render(&source, Markup::Html, context)
                .map_err(|e| {
                    warn!(
                        subscription = sub.id,
                        error = %e,
                        "HTML template failed, sending plain text"
                    );
                })
                .ok()
        });

        EmailMessage {
            subject: format!("{}{}", self.mail.subject_prefix, event.display()),
            body,
            html,
            from: self.mail.from_address.clone(),
            to,
        }
    }

    /// Send once; if that fails with an HTML part, retry once as plain text
    fn deliver(&self, message: &EmailMessage, report: &mut FanOutReport) {
        let mailer = &self.collab.mailer;

        let first = match mailer.send(message) {
            Ok(()) => {
                report.emails += 1;
                return;
            },
            Err(e) => e,
        };

        if message.html.is_some() {
            warn!(
                to = ?message.to,
                error = %first,
                "Email send failed, retrying without HTML"
            );
            match mailer.send(&message.plain_only()) {
                Ok(()) => {
                    report.emails += 1;
                    return;
                },
                Err(e) => {
                    error!(to = ?message.to, error = %e, "Email send failed");
                },
            }
        } else {
            error!(to = ?message.to, error = %first, "Email send failed");
        }
        report.failed_emails += 1;
    }
}

fn fallback_body(event: &AlarmEvent, alarm: &Alarm) -> String {
    format!(
        "{}\n\nEvent {} created at {}.\n{}\n",
        alarm.name,
        event.display(),
        event.created.format("%Y-%m-%d %H:%M:%S UTC"),
        event.description
    )
}

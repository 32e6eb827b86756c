//! Notification Fan-out Tests
//!
//! One event, many subscribers:
//! - per-user notification and per-address email deduplication
//! - single email for a group subscription
//! - template selection and plain-text fallback
//! - send failures and the plain-only retry

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use alarmsrv::domain::{RelatedObject, Subscription};
use alarmsrv::services::{FanOutReport, NotificationFilter};
use common::{FailingMailer, Fixture};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Barn, device monitor and the "Low food" alarm; returns the alarm id
fn seed(fx: &Fixture) -> i64 {
    fx.barn();
    let monitor = fx.device_monitor(&[1]);
    fx.alarm("Low food", "{{ vars.food.value }} < 5", &[monitor.id]).id
}

fn subscribe_user(fx: &Fixture, alarm: i64, user: i64) -> Subscription {
    fx.grant_user(user, alarm);
    fx.service
        .create_subscription(Subscription::for_user(alarm, user))
        .unwrap()
}

fn subscribe_group(fx: &Fixture, alarm: i64, group: i64) -> Subscription {
    fx.grant_group(group, alarm);
    fx.service
        .create_subscription(Subscription::for_group(alarm, group))
        .unwrap()
}

fn notified_users(fx: &Fixture) -> Vec<i64> {
    fx.service
        .notifications(&NotificationFilter::default())
        .unwrap()
        .into_iter()
        .map(|n| n.user)
        .collect()
}

// ============================================================================
// Recipients
// ============================================================================

#[test]
fn test_bare_event_fans_out_nothing() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    subscribe_user(&fx, alarm, 1);

    let (event, report) = fx
        .service
        .record_manual_event(alarm, None, BTreeSet::new())
        .unwrap();

    assert_eq!(report, FanOutReport::default());
    assert!(notified_users(&fx).is_empty());
    assert!(fx.backend.mailer.sent().is_empty());

    // running the fan-out again on the stored event changes nothing
    assert_eq!(fx.service.fan_out(&event).unwrap(), FanOutReport::default());
}

#[test]
fn test_individual_subscriptions_dedup_addresses() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ops@example.com"));
    fx.user(2, "ben", Some(" ops@example.com "));
    fx.user(3, "carl", None);
    for user in [1, 2, 3] {
        subscribe_user(&fx, alarm, user);
    }

    let report = fx.set_and_touch(1, 3);

    // everyone is notified, the shared address gets one email
    assert_eq!(report.notifications, 3);
    assert_eq!(report.emails, 1);
    assert_eq!(notified_users(&fx), vec![1, 2, 3]);

    let sent = fx.backend.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["ops@example.com".to_string()]);
}

#[test]
fn test_email_disabled_still_notifies() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    fx.grant_user(1, alarm);
    let mut sub = Subscription::for_user(alarm, 1);
    sub.email = false;
    fx.service.create_subscription(sub).unwrap();

    let report = fx.set_and_touch(1, 3);

    assert_eq!(report.notifications, 1);
    assert_eq!(report.emails, 0);
    assert!(fx.backend.mailer.sent().is_empty());
}

#[test]
fn test_inactive_subscription_is_skipped() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    let sub = subscribe_user(&fx, alarm, 1);
    fx.service.set_subscription_active(sub.id, false).unwrap();

    let report = fx.set_and_touch(1, 3);

    assert_eq!(report.opened.len(), 1);
    assert_eq!(report.notifications, 0);
    assert!(fx.backend.mailer.sent().is_empty());
}

#[test]
fn test_group_subscription_sends_one_email() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    fx.user(2, "ben", Some("ben@example.com"));
    fx.user(3, "carl", None);
    fx.group(1, "Operators", &[1, 2, 3]);
    subscribe_group(&fx, alarm, 1);

    let report = fx.set_and_touch(1, 3);

    assert_eq!(report.notifications, 3);
    assert_eq!(report.emails, 1);
    let sent = fx.backend.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].to,
        vec!["ana@example.com".to_string(), "ben@example.com".to_string()]
    );
}

#[test]
fn test_overlapping_groups_dedup_members() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    fx.user(2, "ben", Some("ben@example.com"));
    fx.user(3, "carl", Some("carl@example.com"));
    fx.group(1, "Operators", &[1, 2]);
    fx.group(2, "Night shift", &[1, 3]);
    subscribe_group(&fx, alarm, 1);
    subscribe_group(&fx, alarm, 2);

    let report = fx.set_and_touch(1, 3);

    assert_eq!(report.notifications, 3);
    assert_eq!(notified_users(&fx), vec![1, 2, 3]);

    let sent = fx.backend.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0].to,
        vec!["ana@example.com".to_string(), "ben@example.com".to_string()]
    );
    assert_eq!(sent[1].to, vec!["carl@example.com".to_string()]);
}

#[test]
fn test_group_without_new_addresses_sends_nothing() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    fx.user(2, "ben", None);
    fx.group(1, "Operators", &[2]);
    subscribe_user(&fx, alarm, 1);
    subscribe_group(&fx, alarm, 1);

    let report = fx.set_and_touch(1, 3);

    assert_eq!(report.notifications, 2);
    assert_eq!(report.emails, 1);
}

// ============================================================================
// Message content
// ============================================================================

#[test]
fn test_plain_body_from_named_template() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    fx.group(1, "Operators", &[]);
    fx.user(2, "ben", Some("ben@example.com"));
    fx.store().add_member(1, 2).unwrap();
    subscribe_user(&fx, alarm, 1);
    subscribe_group(&fx, alarm, 1);
    fx.backend.templates.insert(
        "mail.txt",
        concat!(
            "{{ alarm.name }} on {{ device.name }} ({{ var.slug }}) ",
            "for {{ user.username }}{{ user.name }}"
        ),
    )
    .unwrap();

    fx.set_and_touch(1, 3);

    let sent = fx.backend.mailer.sent();
    assert_eq!(sent.len(), 2);
    // user context for individuals, group context for groups
    assert_eq!(sent[0].body, "Low food on Barn (barn-food) for ana");
    assert_eq!(sent[1].body, "Low food on Barn (barn-food) for Operators");
    assert!(sent.iter().all(|m| m.html.is_none()));
}

#[test]
fn test_plain_body_fallback_without_template() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    subscribe_user(&fx, alarm, 1);

    fx.set_and_touch(1, 3);

    let sent = fx.backend.mailer.sent();
    assert!(sent[0].body.starts_with("Low food\n"));
    assert!(sent[0].body.contains("DV-1 created at 2024-01-01 00:00:00 UTC"));
}

#[test]
fn test_html_from_named_template() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    fx.grant_user(1, alarm);
    let mut sub = Subscription::for_user(alarm, 1);
    sub.staff_template = Some("alert.html".to_string());
    fx.service.create_subscription(sub).unwrap();
    fx.backend
        .templates
        .insert("alert.html", "<b>{{ event.display }} on {{ device.name }}</b>")
        .unwrap();

    fx.set_and_touch(1, 3);

    let sent = fx.backend.mailer.sent();
    assert_eq!(sent[0].html.as_deref(), Some("<b>DV-1 on Barn</b>"));
}

#[test]
fn test_html_from_inline_text() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    fx.grant_user(1, alarm);
    let mut sub = Subscription::for_user(alarm, 1);
    sub.user_template_text = Some("<p>{{ var.value }} left</p>".to_string());
    fx.service.create_subscription(sub).unwrap();

    fx.set_and_touch(1, 3);

    let sent = fx.backend.mailer.sent();
    assert_eq!(sent[0].html.as_deref(), Some("<p>3 left</p>"));
}

#[test]
fn test_html_part_escapes_entity_text() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.device(1, "<script>alert(1)</script>");
    fx.user(1, "ana", Some("ana@example.com"));
    fx.grant_user(1, alarm);
    let mut sub = Subscription::for_user(alarm, 1);
    sub.user_template_text = Some("<p>{{ device.name }}</p>".to_string());
    fx.service.create_subscription(sub).unwrap();
    fx.backend
        .templates
        .insert("mail.txt", "{{ device.name }} & {{ alarm.name }}")
        .unwrap();

    fx.set_and_touch(1, 3);

    let sent = fx.backend.mailer.sent();
    assert_eq!(
        sent[0].html.as_deref(),
        Some("<p>&lt;script&gt;alert(1)&lt;/script&gt;</p>")
    );
    assert_eq!(sent[0].body, "<script>alert(1)</script> & Low food");
}

#[test]
fn test_missing_html_template_sends_plain() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    fx.grant_user(1, alarm);
    let mut sub = Subscription::for_user(alarm, 1);
    sub.user_template = Some("missing.html".to_string());
    fx.service.create_subscription(sub).unwrap();

    let report = fx.set_and_touch(1, 3);

    assert_eq!(report.emails, 1);
    assert_eq!(fx.backend.mailer.sent()[0].html, None);
}

#[test]
fn test_related_objects_in_context() {
    let fx = Fixture::new();
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    subscribe_user(&fx, alarm, 1);
    fx.backend
        .templates
        .insert("mail.txt", "{{ event.display }}: {{ event.description }}")
        .unwrap();

    let related = BTreeSet::from([RelatedObject::new("ticket", 3)]);
    fx.service
        .record_manual_event(alarm, Some("Inspect hopper".to_string()), related)
        .unwrap();

    let sent = fx.backend.mailer.sent();
    assert_eq!(sent[0].body, "US-1: Inspect hopper");
    assert_eq!(sent[0].subject, "Event Alert: US-1");
}

// ============================================================================
// Send failures
// ============================================================================

#[test]
fn test_html_failure_retries_plain_only() {
    let mailer = Arc::new(FailingMailer::html());
    let fx = Fixture::with_mailer(mailer.clone());
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    fx.grant_user(1, alarm);
    let mut sub = Subscription::for_user(alarm, 1);
    sub.user_template_text = Some("<p>{{ alarm.name }}</p>".to_string());
    fx.service.create_subscription(sub).unwrap();

    let report = fx.set_and_touch(1, 3);

    assert_eq!(report.emails, 1);
    let attempts = mailer.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].html.as_deref(), Some("<p>Low food</p>"));
    assert_eq!(attempts[1].html, None);
    assert_eq!(attempts[1].body, attempts[0].body);
}

#[test]
fn test_send_failure_never_aborts_fan_out() {
    let mailer = Arc::new(FailingMailer::always());
    let fx = Fixture::with_mailer(mailer.clone());
    let alarm = seed(&fx);
    fx.user(1, "ana", Some("ana@example.com"));
    fx.user(2, "ben", Some("ben@example.com"));
    subscribe_user(&fx, alarm, 1);
    fx.grant_user(2, alarm);
    let mut sub = Subscription::for_user(alarm, 2);
    sub.staff_template_text = Some("<p>{{ alarm.name }}</p>".to_string());
    fx.service.create_subscription(sub).unwrap();

    let report = fx.set_and_touch(1, 3);

    // the event and both notifications survive
    assert_eq!(report.opened.len(), 1);
    assert_eq!(report.notifications, 2);
    assert_eq!(report.emails, 0);
    assert_eq!(notified_users(&fx), vec![1, 2]);

    // ana: one plain attempt, ben: html then plain
    assert_eq!(mailer.attempts().len(), 3);
}

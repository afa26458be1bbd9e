//! On-call schedule resolution.
//!
//! Rotations are anchored at each layer's `rotation_start` and computed in
//! absolute time, so they are deterministic before and after that epoch.
//! Daily restriction windows are evaluated in the schedule's time zone.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageError;
use crate::model::{DailyWindow, OnCallSchedule, RotationLayer, ScheduleOverride};
use crate::storage::{Filter, Repository, Storage};

#[derive(Debug, Error)]
pub enum OnCallError {
    #[error("Unknown time zone: {0}")]
    UnknownTimezone(String),

    #[error("Invalid rotation layer {layer}: {reason}")]
    InvalidLayer { layer: String, reason: &'static str },

    #[error("On-call schedule {0} not found")]
    ScheduleNotFound(Uuid),

    #[error("Override must end after it starts")]
    InvalidOverride,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

type Result<T> = std::result::Result<T, OnCallError>;

/// Where the primary responder came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponderSource {
    Override { override_id: Uuid },
    Rotation { layer: String },
    /// Primary unavailable, backup layer stepped in
    Backup { layer: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnCallResolution {
    pub schedule_id: Uuid,
    pub at: DateTime<Utc>,
    pub primary: Option<String>,
    pub source: Option<ResponderSource>,
    pub backups: Vec<String>,
}

/// Next change of primary responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handoff {
    pub user: String,
    pub starts_at: DateTime<Utc>,
    pub source: ResponderSource,
}

fn timezone(schedule: &OnCallSchedule) -> Result<Tz> {
    schedule
        .timezone
        .parse::<Tz>()
        .map_err(|_| OnCallError::UnknownTimezone(schedule.timezone.clone()))
}

fn shift_length(layer: &RotationLayer) -> Result<Duration> {
    if layer.users.is_empty() {
        return Err(OnCallError::InvalidLayer { layer: layer.name.clone(), reason: "no users" });
    }
    if layer.rotation_hours == 0 {
        return Err(OnCallError::InvalidLayer { layer: layer.name.clone(), reason: "rotation length is zero" });
    }
    Ok(Duration::hours(i64::from(layer.rotation_hours)))
}

/// Index of the shift containing `at`; negative before the rotation epoch
fn shift_index(layer: &RotationLayer, length: Duration, at: DateTime<Utc>) -> i64 {
    (at - layer.rotation_start).num_seconds().div_euclid(length.num_seconds())
}

/// User on shift for a layer at `at`, if the layer has a shift then
fn layer_responder(layer: &RotationLayer, tz: Tz, at: DateTime<Utc>) -> Result<Option<String>> {
    let length = shift_length(layer)?;
    if let Some(window) = &layer.restriction {
        if !window.contains(at.with_timezone(&tz).time()) {
            return Ok(None);
        }
    }
    let k = shift_index(layer, length, at);
    let user = &layer.users[k.rem_euclid(layer.users.len() as i64) as usize];
    Ok(Some(user.clone()))
}

/// Latest-created override of this schedule covering `at`
fn active_override<'a>(
    schedule: &OnCallSchedule,
    overrides: &'a [ScheduleOverride],
    at: DateTime<Utc>,
) -> Option<&'a ScheduleOverride> {
    overrides
        .iter()
        .filter(|o| o.schedule_id == schedule.id && o.covers(at))
        .max_by_key(|o| o.created_at)
}

/// Who is on call at `at`
///
/// Users in `unavailable` are replaced by the first available backup.
pub fn resolve(
    schedule: &OnCallSchedule,
    overrides: &[ScheduleOverride],
    at: DateTime<Utc>,
    unavailable: &[String],
) -> Result<OnCallResolution> {
    let mut resolution = OnCallResolution {
        schedule_id: schedule.id,
        at,
        primary: None,
        source: None,
        backups: Vec::new(),
    };
    if !schedule.enabled {
        return Ok(resolution);
    }
    let tz = timezone(schedule)?;

    if let Some(o) = active_override(schedule, overrides, at) {
        resolution.primary = Some(o.user_id.clone());
        resolution.source = Some(ResponderSource::Override { override_id: o.id });
    } else {
        for layer in schedule.layers.iter().filter(|l| !l.is_backup) {
            if let Some(user) = layer_responder(layer, tz, at)? {
                resolution.primary = Some(user);
                resolution.source = Some(ResponderSource::Rotation { layer: layer.name.clone() });
                break;
            }
        }
    }

    let mut backups: Vec<(String, String)> = Vec::new();
    for layer in schedule.layers.iter().filter(|l| l.is_backup) {
        if let Some(user) = layer_responder(layer, tz, at)? {
            if Some(&user) != resolution.primary.as_ref() && !backups.iter().any(|(u, _)| *u == user) {
                backups.push((user, layer.name.clone()));
            }
        }
    }

    let primary_unavailable = resolution.primary.as_ref().is_some_and(|p| unavailable.contains(p));
    if primary_unavailable {
        if let Some(index) = backups.iter().position(|(u, _)| !unavailable.contains(u)) {
            let (user, layer) = backups.remove(index);
            debug!(schedule_id = %schedule.id, primary = ?resolution.primary, backup = %user, "primary unavailable, using backup");
            resolution.primary = Some(user);
            resolution.source = Some(ResponderSource::Backup { layer });
        }
    }

    resolution.backups = backups.into_iter().map(|(u, _)| u).collect();
    Ok(resolution)
}

fn restriction_boundaries(
    window: &DailyWindow,
    tz: Tz,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    out: &mut Vec<DateTime<Utc>>,
) {
    let first: NaiveDate = from.with_timezone(&tz).date_naive() - Duration::days(1);
    let last: NaiveDate = until.with_timezone(&tz).date_naive() + Duration::days(1);
    for day in first.iter_days().take_while(|d| *d <= last) {
        for time in [window.start, window.end] {
            // Nonexistent local times (DST gap) have no boundary that day
            if let Some(local) = tz.from_local_datetime(&day.and_time(time)).earliest() {
                out.push(local.with_timezone(&Utc));
            }
        }
    }
}

/// Candidate instants in `(from, until]` at which the primary could change
fn boundaries(
    schedule: &OnCallSchedule,
    overrides: &[ScheduleOverride],
    tz: Tz,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let mut out = Vec::new();
    for layer in &schedule.layers {
        let length = shift_length(layer)?;
        let mut k = shift_index(layer, length, from) + 1;
        loop {
            let handoff = layer.rotation_start + Duration::seconds(length.num_seconds() * k);
            if handoff > until {
                break;
            }
            out.push(handoff);
            k += 1;
        }
        if let Some(window) = &layer.restriction {
            restriction_boundaries(window, tz, from, until, &mut out);
        }
    }
    for o in overrides.iter().filter(|o| o.schedule_id == schedule.id) {
        out.push(o.start);
        out.push(o.end);
    }
    out.retain(|b| *b > from && *b <= until);
    out.sort();
    out.dedup();
    Ok(out)
}

/// First handoff after `at` to a different primary within the horizon
pub fn next_on_call(
    schedule: &OnCallSchedule,
    overrides: &[ScheduleOverride],
    at: DateTime<Utc>,
    horizon: Duration,
) -> Result<Option<Handoff>> {
    if !schedule.enabled {
        return Ok(None);
    }
    let tz = timezone(schedule)?;
    let current = resolve(schedule, overrides, at, &[])?.primary;

    for boundary in boundaries(schedule, overrides, tz, at, at + horizon)? {
        let resolution = resolve(schedule, overrides, boundary, &[])?;
        if let (Some(user), Some(source)) = (resolution.primary, resolution.source) {
            if current.as_ref() != Some(&user) {
                return Ok(Some(Handoff { user, starts_at: boundary, source }));
            }
        }
    }
    Ok(None)
}

/// Schedules and overrides backed by storage
pub struct OnCallService {
    schedules: Repository<OnCallSchedule>,
    overrides: Repository<ScheduleOverride>,
    horizon: Duration,
}

impl OnCallService {
    pub fn new(storage: Arc<dyn Storage>, horizon_days: u32) -> Self {
        Self {
            schedules: Repository::new(Arc::clone(&storage)),
            overrides: Repository::new(storage),
            horizon: Duration::days(i64::from(horizon_days.max(1))),
        }
    }

    pub async fn save_schedule(&self, schedule: &OnCallSchedule) -> Result<()> {
        timezone(schedule)?;
        for layer in &schedule.layers {
            shift_length(layer)?;
        }
        self.schedules.save(schedule).await?;
        Ok(())
    }

    pub async fn schedule(&self, id: Uuid) -> Result<OnCallSchedule> {
        self.schedules.get(id).await?.ok_or(OnCallError::ScheduleNotFound(id))
    }

    pub async fn add_override(&self, o: &ScheduleOverride) -> Result<()> {
        if o.end <= o.start {
            return Err(OnCallError::InvalidOverride);
        }
        self.schedule(o.schedule_id).await?;
        self.overrides.save(o).await?;
        Ok(())
    }

    pub async fn remove_override(&self, id: Uuid) -> Result<bool> {
        Ok(self.overrides.delete(id).await?)
    }

    async fn overrides_for(&self, schedule_id: Uuid) -> Result<Vec<ScheduleOverride>> {
        Ok(self.overrides.find(&Filter::all().eq("schedule_id", schedule_id.to_string())).await?)
    }

    pub async fn on_call(&self, schedule_id: Uuid, at: DateTime<Utc>, unavailable: &[String]) -> Result<OnCallResolution> {
        let schedule = self.schedule(schedule_id).await?;
        let overrides = self.overrides_for(schedule_id).await?;
        resolve(&schedule, &overrides, at, unavailable)
    }

    pub async fn next_on_call(&self, schedule_id: Uuid, at: DateTime<Utc>) -> Result<Option<Handoff>> {
        let schedule = self.schedule(schedule_id).await?;
        let overrides = self.overrides_for(schedule_id).await?;
        next_on_call(&schedule, &overrides, at, self.horizon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::NaiveTime;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn users(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn day_shift_schedule() -> OnCallSchedule {
        let layer = RotationLayer::new("days", users(&["alice"]), 24, utc(2024, 1, 1, 0, 0))
            .restricted_to(DailyWindow::new(t(8), t(16)));
        OnCallSchedule::new("platform", "UTC", vec![layer])
    }

    #[test]
    fn rotation_cycles_in_both_directions() {
        let layer = RotationLayer::new("weekly", users(&["a", "b", "c"]), 24, utc(2024, 1, 10, 0, 0));
        let schedule = OnCallSchedule::new("s", "UTC", vec![layer]);
        let at = |d, h| resolve(&schedule, &[], utc(2024, 1, d, h, 0), &[]).unwrap().primary.unwrap();

        assert_eq!(at(10, 0), "a");
        assert_eq!(at(11, 23), "b");
        assert_eq!(at(13, 5), "a");
        // Before the epoch
        assert_eq!(at(9, 12), "c");
        assert_eq!(at(8, 0), "b");
    }

    #[test]
    fn override_replaces_rotation() {
        let schedule = day_shift_schedule();
        let cover = ScheduleOverride::new(schedule.id, "bob", utc(2024, 3, 4, 10, 0), utc(2024, 3, 4, 12, 0));
        let overrides = vec![cover.clone()];

        let at_11 = resolve(&schedule, &overrides, utc(2024, 3, 4, 11, 0), &[]).unwrap();
        assert_eq!(at_11.primary.as_deref(), Some("bob"));
        assert_eq!(at_11.source, Some(ResponderSource::Override { override_id: cover.id }));

        let at_9 = resolve(&schedule, &overrides, utc(2024, 3, 4, 9, 0), &[]).unwrap();
        assert_eq!(at_9.primary.as_deref(), Some("alice"));

        let at_17 = resolve(&schedule, &overrides, utc(2024, 3, 4, 17, 0), &[]).unwrap();
        assert_eq!(at_17.primary, None);
    }

    #[test]
    fn latest_override_wins() {
        let schedule = day_shift_schedule();
        let mut older = ScheduleOverride::new(schedule.id, "bob", utc(2024, 3, 4, 9, 0), utc(2024, 3, 4, 12, 0));
        older.created_at = utc(2024, 3, 1, 0, 0);
        let mut newer = ScheduleOverride::new(schedule.id, "carol", utc(2024, 3, 4, 10, 0), utc(2024, 3, 4, 11, 0));
        newer.created_at = utc(2024, 3, 2, 0, 0);
        let other_schedule = ScheduleOverride::new(Uuid::new_v4(), "mallory", utc(2024, 3, 4, 0, 0), utc(2024, 3, 5, 0, 0));
        let overrides = vec![older, newer, other_schedule];

        let primary = |h| resolve(&schedule, &overrides, utc(2024, 3, 4, h, 30), &[]).unwrap().primary.unwrap();
        assert_eq!(primary(9), "bob");
        assert_eq!(primary(10), "carol");
        assert_eq!(primary(11), "bob");
    }

    #[test]
    fn restriction_uses_schedule_timezone() {
        let layer = RotationLayer::new("business", users(&["dana"]), 168, utc(2024, 1, 1, 0, 0))
            .restricted_to(DailyWindow::new(t(9), t(17)));
        let schedule = OnCallSchedule::new("ny", "America/New_York", vec![layer]);

        // 13:00 UTC is 09:00 EDT in July
        let summer = resolve(&schedule, &[], utc(2024, 7, 1, 13, 0), &[]).unwrap();
        assert_eq!(summer.primary.as_deref(), Some("dana"));
        let early = resolve(&schedule, &[], utc(2024, 7, 1, 12, 59), &[]).unwrap();
        assert_eq!(early.primary, None);
    }

    #[test]
    fn backup_steps_in_only_when_primary_unavailable() {
        let start = utc(2024, 1, 1, 0, 0);
        let schedule = OnCallSchedule::new(
            "db",
            "UTC",
            vec![
                RotationLayer::new("primary", users(&["erin"]), 24, start),
                RotationLayer::new("secondary", users(&["frank"]), 24, start).backup(),
            ],
        );
        let at = utc(2024, 5, 5, 5, 0);

        let normal = resolve(&schedule, &[], at, &[]).unwrap();
        assert_eq!(normal.primary.as_deref(), Some("erin"));
        assert_eq!(normal.backups, users(&["frank"]));

        let away = resolve(&schedule, &[], at, &users(&["erin"])).unwrap();
        assert_eq!(away.primary.as_deref(), Some("frank"));
        assert_eq!(away.source, Some(ResponderSource::Backup { layer: "secondary".into() }));
        assert!(away.backups.is_empty());
    }

    #[test]
    fn disabled_and_invalid_schedules() {
        let mut schedule = day_shift_schedule();
        schedule.enabled = false;
        assert_eq!(resolve(&schedule, &[], utc(2024, 3, 4, 9, 0), &[]).unwrap().primary, None);

        let mut bad_tz = day_shift_schedule();
        bad_tz.timezone = "Mars/Olympus".into();
        assert!(matches!(resolve(&bad_tz, &[], Utc::now(), &[]), Err(OnCallError::UnknownTimezone(_))));

        let empty = OnCallSchedule::new("empty", "UTC", vec![RotationLayer::new("l", vec![], 24, Utc::now())]);
        assert!(matches!(resolve(&empty, &[], Utc::now(), &[]), Err(OnCallError::InvalidLayer { .. })));
    }

    #[test]
    fn next_on_call_finds_override_and_return() {
        let schedule = day_shift_schedule();
        let overrides = vec![ScheduleOverride::new(schedule.id, "bob", utc(2024, 3, 4, 10, 0), utc(2024, 3, 4, 12, 0))];
        let horizon = Duration::days(30);

        let next = next_on_call(&schedule, &overrides, utc(2024, 3, 4, 9, 0), horizon).unwrap().unwrap();
        assert_eq!(next.user, "bob");
        assert_eq!(next.starts_at, utc(2024, 3, 4, 10, 0));

        let back = next_on_call(&schedule, &overrides, utc(2024, 3, 4, 10, 30), horizon).unwrap().unwrap();
        assert_eq!(back.user, "alice");
        assert_eq!(back.starts_at, utc(2024, 3, 4, 12, 0));

        // Nobody on call in the evening; the next shift starts in the morning
        let morning = next_on_call(&schedule, &[], utc(2024, 3, 4, 18, 0), horizon).unwrap().unwrap();
        assert_eq!(morning.user, "alice");
        assert_eq!(morning.starts_at, utc(2024, 3, 5, 8, 0));
    }

    #[test]
    fn next_on_call_follows_rotation_handoffs() {
        let layer = RotationLayer::new("daily", users(&["a", "b"]), 24, utc(2024, 1, 1, 6, 0));
        let schedule = OnCallSchedule::new("s", "UTC", vec![layer]);
        let next = next_on_call(&schedule, &[], utc(2024, 1, 1, 7, 0), Duration::days(30)).unwrap().unwrap();
        assert_eq!(next.user, "b");
        assert_eq!(next.starts_at, utc(2024, 1, 2, 6, 0));

        // Single responder: no handoff within the horizon
        let solo = OnCallSchedule::new("solo", "UTC", vec![RotationLayer::new("l", users(&["a"]), 24, utc(2024, 1, 1, 0, 0))]);
        assert_eq!(next_on_call(&solo, &[], utc(2024, 1, 1, 7, 0), Duration::days(30)).unwrap(), None);
    }

    #[tokio::test]
    async fn service_resolves_stored_schedules() {
        let service = OnCallService::new(Arc::new(MemoryStorage::new()), 30);
        let schedule = day_shift_schedule();
        service.save_schedule(&schedule).await.unwrap();
        service
            .add_override(&ScheduleOverride::new(schedule.id, "bob", utc(2024, 3, 4, 10, 0), utc(2024, 3, 4, 12, 0)))
            .await
            .unwrap();

        let at_11 = service.on_call(schedule.id, utc(2024, 3, 4, 11, 0), &[]).await.unwrap();
        assert_eq!(at_11.primary.as_deref(), Some("bob"));
        let at_9 = service.on_call(schedule.id, utc(2024, 3, 4, 9, 0), &[]).await.unwrap();
        assert_eq!(at_9.primary.as_deref(), Some("alice"));

        assert!(matches!(
            service.on_call(Uuid::new_v4(), Utc::now(), &[]).await,
            Err(OnCallError::ScheduleNotFound(_))
        ));
        let inverted = ScheduleOverride::new(schedule.id, "x", utc(2024, 3, 4, 12, 0), utc(2024, 3, 4, 10, 0));
        assert!(matches!(service.add_override(&inverted).await, Err(OnCallError::InvalidOverride)));
    }
}

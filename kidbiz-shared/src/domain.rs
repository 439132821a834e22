use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

/// Length of an access code without the separator.
pub const ACCESS_CODE_LEN: usize = 6;
const ACCESS_CODE_SPLIT: usize = 3;

/// Normalizes user input into the canonical `ABC-123` shape.
///
/// Non-alphanumeric characters are dropped, letters are uppercased and the
/// result is cut to [`ACCESS_CODE_LEN`] characters. The dash only appears once
/// more than three characters have been typed, so partial input formats the
/// same way the login form shows it.
pub fn format_access_code(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .take(ACCESS_CODE_LEN)
        .collect();
    if cleaned.len() > ACCESS_CODE_SPLIT {
        format!(
            "{}-{}",
            &cleaned[..ACCESS_CODE_SPLIT],
            &cleaned[ACCESS_CODE_SPLIT..]
        )
    } else {
        cleaned
    }
}

/// Random code in canonical form. Ambiguous glyphs (0/O, 1/I) are excluded.
pub fn generate_access_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let bytes = uuid::Uuid::new_v4().into_bytes();
    let raw: String = bytes
        .iter()
        .take(ACCESS_CODE_LEN)
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect();
    format_access_code(&raw)
}

/// Rounded completion percentage, `0` for an empty module.
pub fn completion_percent(completed: i64, total: i64) -> i32 {
    if total <= 0 {
        return 0;
    }
    let pct = (completed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as i32
}

/// Levels start at 1 and advance every `xp_per_level` points.
pub fn level_for_xp(total_xp: i64, xp_per_level: i64) -> i32 {
    let per = xp_per_level.max(1);
    (total_xp.max(0) / per + 1) as i32
}

/// How far into the current level the child is, as shown on progress bars.
pub fn level_progress_percent(total_xp: i64, xp_per_level: i64) -> i32 {
    let per = xp_per_level.max(1);
    ((total_xp.max(0) % per) * 100 / per) as i32
}

/// `retention_days - floor(elapsed days)`; negative once the window passed.
pub fn days_until_permanent_deletion(
    deleted_at: OffsetDateTime,
    now: OffsetDateTime,
    retention_days: i64,
) -> i64 {
    let elapsed_ms = (now - deleted_at).whole_milliseconds() as i64;
    retention_days - elapsed_ms.div_euclid(Duration::DAY.whole_milliseconds() as i64)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    /// Billing providers add states over time; keep whatever we were given.
    Other(String),
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Other(s) => s,
        }
    }

    /// `active` always grants access, `trialing` only until the trial ends.
    /// A trial without an end date has lapsed.
    pub fn grants_access(&self, trial_ends_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
        match self {
            SubscriptionStatus::Active => true,
            SubscriptionStatus::Trialing => trial_ends_at.is_some_and(|end| end > now),
            _ => false,
        }
    }
}

impl From<&str> for SubscriptionStatus {
    fn from(value: &str) -> Self {
        match value {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "unpaid" => SubscriptionStatus::Unpaid,
            other => SubscriptionStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SubscriptionStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SubscriptionStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SubscriptionStatus::from(s.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Revenue,
    Expense,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Revenue => "revenue",
            TransactionKind::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "revenue" => Some(TransactionKind::Revenue),
            "expense" => Some(TransactionKind::Expense),
            _ => None,
        }
    }
}

/// Running totals of a company ledger, in cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub balance_cents: i64,
    pub revenue_cents: i64,
    pub expense_cents: i64,
}

impl LedgerTotals {
    /// Balance may go negative; the simulation lets kids overspend.
    /// Returns `None` when any total would leave the `i64` range.
    pub fn apply(self, kind: TransactionKind, amount_cents: i64) -> Option<Self> {
        match kind {
            TransactionKind::Revenue => Some(LedgerTotals {
                balance_cents: self.balance_cents.checked_add(amount_cents)?,
                revenue_cents: self.revenue_cents.checked_add(amount_cents)?,
                expense_cents: self.expense_cents,
            }),
            TransactionKind::Expense => Some(LedgerTotals {
                balance_cents: self.balance_cents.checked_sub(amount_cents)?,
                revenue_cents: self.revenue_cents,
                expense_cents: self.expense_cents.checked_add(amount_cents)?,
            }),
        }
    }
}

/// Statistic an achievement threshold is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementKind {
    LessonsCompleted,
    ModulesCompleted,
    TotalXp,
    StreakDays,
    CompanyRevenueCents,
}

impl AchievementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementKind::LessonsCompleted => "lessons_completed",
            AchievementKind::ModulesCompleted => "modules_completed",
            AchievementKind::TotalXp => "total_xp",
            AchievementKind::StreakDays => "streak_days",
            AchievementKind::CompanyRevenueCents => "company_revenue_cents",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lessons_completed" => Some(AchievementKind::LessonsCompleted),
            "modules_completed" => Some(AchievementKind::ModulesCompleted),
            "total_xp" => Some(AchievementKind::TotalXp),
            "streak_days" => Some(AchievementKind::StreakDays),
            "company_revenue_cents" => Some(AchievementKind::CompanyRevenueCents),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: AchievementKind,
    pub threshold: i64,
}

/// Snapshot of the numbers achievement rules are checked against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildStats {
    pub lessons_completed: i64,
    pub modules_completed: i64,
    pub total_xp: i64,
    pub streak_days: i64,
    pub company_revenue_cents: i64,
}

impl ChildStats {
    pub fn value(&self, kind: AchievementKind) -> i64 {
        match kind {
            AchievementKind::LessonsCompleted => self.lessons_completed,
            AchievementKind::ModulesCompleted => self.modules_completed,
            AchievementKind::TotalXp => self.total_xp,
            AchievementKind::StreakDays => self.streak_days,
            AchievementKind::CompanyRevenueCents => self.company_revenue_cents,
        }
    }

    pub fn satisfies(&self, kind: AchievementKind, threshold: i64) -> bool {
        self.value(kind) >= threshold
    }
}

/// Next streak length given the last active day and today (both as days
/// since epoch): same day keeps it, the next day extends it, a gap resets it.
pub fn next_streak(last_active_day: Option<i64>, today: i64, current: i32) -> i32 {
    match last_active_day {
        Some(d) if d == today => current.max(1),
        Some(d) if d + 1 == today => current + 1,
        _ => 1,
    }
}

/// What a child device keeps locally between page loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildSession {
    pub child_id: String,
    pub child_name: String,
    pub access_code: String,
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_code_is_uppercased_and_split() {
        assert_eq!(format_access_code("abc123"), "ABC-123");
        assert_eq!(format_access_code(" a-b_c 1.2.3 "), "ABC-123");
        assert_eq!(format_access_code("ab"), "AB");
        assert_eq!(format_access_code("abc"), "ABC");
        assert_eq!(format_access_code("abcd"), "ABC-D");
        assert_eq!(format_access_code("abc1234567"), "ABC-123");
    }

    #[test]
    fn generated_codes_are_canonical() {
        for _ in 0..32 {
            let code = generate_access_code();
            assert_eq!(code.len(), ACCESS_CODE_LEN + 1);
            assert_eq!(format_access_code(&code), code);
        }
    }

    #[test]
    fn completion_rounds_and_handles_empty_modules() {
        assert_eq!(completion_percent(0, 0), 0);
        assert_eq!(completion_percent(1, 3), 33);
        assert_eq!(completion_percent(2, 3), 67);
        assert_eq!(completion_percent(3, 3), 100);
    }

    #[test]
    fn levels_follow_xp() {
        assert_eq!(level_for_xp(0, 100), 1);
        assert_eq!(level_for_xp(99, 100), 1);
        assert_eq!(level_for_xp(250, 100), 3);
        assert_eq!(level_progress_percent(250, 100), 50);
        assert_eq!(level_progress_percent(-5, 100), 0);
    }

    #[test]
    fn retention_counts_whole_days() {
        let deleted = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(days_until_permanent_deletion(deleted, deleted, 30), 30);
        let later = deleted + Duration::hours(47);
        assert_eq!(days_until_permanent_deletion(deleted, later, 30), 29);
        let much_later = deleted + Duration::days(31);
        assert_eq!(days_until_permanent_deletion(deleted, much_later, 30), -1);
    }

    #[test]
    fn trialing_expires() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let st = SubscriptionStatus::from("trialing");
        assert!(st.grants_access(Some(now + Duration::days(1)), now));
        assert!(!st.grants_access(Some(now - Duration::days(1)), now));
        assert!(!st.grants_access(None, now));
        assert!(SubscriptionStatus::Active.grants_access(None, now));
        assert!(!SubscriptionStatus::from("past_due").grants_access(None, now));
        assert_eq!(
            SubscriptionStatus::from("paused"),
            SubscriptionStatus::Other("paused".into())
        );
    }

    #[test]
    fn streak_extends_only_on_consecutive_days() {
        assert_eq!(next_streak(None, 100, 0), 1);
        assert_eq!(next_streak(Some(100), 100, 3), 3);
        assert_eq!(next_streak(Some(99), 100, 3), 4);
        assert_eq!(next_streak(Some(97), 100, 3), 1);
    }

    #[test]
    fn stats_check_thresholds() {
        let stats = ChildStats {
            lessons_completed: 5,
            total_xp: 40,
            ..Default::default()
        };
        assert!(stats.satisfies(AchievementKind::LessonsCompleted, 5));
        assert!(!stats.satisfies(AchievementKind::TotalXp, 50));
        assert_eq!(
            AchievementKind::parse(AchievementKind::StreakDays.as_str()),
            Some(AchievementKind::StreakDays)
        );
    }

    #[test]
    fn ledger_allows_overspending() {
        let t = LedgerTotals::default()
            .apply(TransactionKind::Revenue, 500)
            .and_then(|t| t.apply(TransactionKind::Expense, 800))
            .unwrap();
        assert_eq!(t.balance_cents, -300);
        assert_eq!(t.revenue_cents, 500);
        assert_eq!(t.expense_cents, 800);
    }

    #[test]
    fn ledger_rejects_overflowing_totals() {
        let full = LedgerTotals::default()
            .apply(TransactionKind::Revenue, i64::MAX)
            .unwrap();
        assert_eq!(full.apply(TransactionKind::Revenue, 1), None);
        let drained = LedgerTotals::default()
            .apply(TransactionKind::Expense, i64::MAX)
            .unwrap();
        assert_eq!(drained.balance_cents, -i64::MAX);
        assert_eq!(drained.apply(TransactionKind::Expense, 2), None);
    }
}

use chrono::{DateTime, Utc};

use crate::model::{RuleConditions, Ticket};

/// Conjunction of every present condition; absent or empty conditions hold
pub fn conditions_match(conditions: &RuleConditions, ticket: &Ticket, now: DateTime<Utc>) -> bool {
    priority_matches(conditions, ticket)
        && tier_matches(conditions, ticket)
        && category_matches(conditions, ticket)
        && keywords_match(conditions, ticket)
        && age_matches(conditions, ticket, now)
        && affected_users_match(conditions, ticket)
}

fn priority_matches(conditions: &RuleConditions, ticket: &Ticket) -> bool {
    match &conditions.priorities {
        Some(priorities) if !priorities.is_empty() => priorities.contains(&ticket.priority),
        _ => true,
    }
}

fn tier_matches(conditions: &RuleConditions, ticket: &Ticket) -> bool {
    match &conditions.customer_tiers {
        Some(tiers) if !tiers.is_empty() => ticket
            .customer_tier
            .as_deref()
            .is_some_and(|tier| tiers.iter().any(|t| t.eq_ignore_ascii_case(tier))),
        _ => true,
    }
}

fn category_matches(conditions: &RuleConditions, ticket: &Ticket) -> bool {
    match conditions.category.as_deref() {
        Some(category) if !category.is_empty() => ticket
            .category
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(category)),
        _ => true,
    }
}

/// Any keyword, case-insensitive, anywhere in title or description
fn keywords_match(conditions: &RuleConditions, ticket: &Ticket) -> bool {
    match &conditions.keywords {
        Some(keywords) if !keywords.is_empty() => {
            let text = ticket.searchable_text().to_lowercase();
            keywords.iter().any(|k| text.contains(&k.to_lowercase()))
        }
        _ => true,
    }
}

fn age_matches(conditions: &RuleConditions, ticket: &Ticket, now: DateTime<Utc>) -> bool {
    match conditions.time_threshold_minutes {
        Some(minutes) => (now - ticket.created_at).num_minutes() >= minutes as i64,
        None => true,
    }
}

fn affected_users_match(conditions: &RuleConditions, ticket: &Ticket) -> bool {
    match conditions.affected_users_threshold {
        Some(threshold) => ticket.affected_users >= threshold,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TicketPriority;
    use chrono::Duration;

    fn ticket() -> Ticket {
        let mut ticket = Ticket::new("T-1", "Checkout outage in EU", TicketPriority::Critical);
        ticket.description = "Customers report 502 on payment".into();
        ticket.customer_tier = Some("Enterprise".into());
        ticket.category = Some("Payments".into());
        ticket.affected_users = 250;
        ticket
    }

    #[test]
    fn empty_conditions_always_match() {
        assert!(conditions_match(&RuleConditions::default(), &ticket(), Utc::now()));

        let empty_lists = RuleConditions {
            priorities: Some(vec![]),
            keywords: Some(vec![]),
            customer_tiers: Some(vec![]),
            ..Default::default()
        };
        assert!(conditions_match(&empty_lists, &ticket(), Utc::now()));
    }

    #[test]
    fn conditions_are_a_conjunction() {
        let conditions = RuleConditions {
            priorities: Some(vec![TicketPriority::High, TicketPriority::Critical]),
            customer_tiers: Some(vec!["enterprise".into()]),
            category: Some("PAYMENTS".into()),
            ..Default::default()
        };
        assert!(conditions_match(&conditions, &ticket(), Utc::now()));

        let mut low = ticket();
        low.priority = TicketPriority::Low;
        assert!(!conditions_match(&conditions, &low, Utc::now()));

        let mut no_tier = ticket();
        no_tier.customer_tier = None;
        assert!(!conditions_match(&conditions, &no_tier, Utc::now()));
    }

    #[test]
    fn any_keyword_matches_title_or_description() {
        let conditions = RuleConditions {
            keywords: Some(vec!["database".into(), "PAYMENT".into()]),
            ..Default::default()
        };
        assert!(conditions_match(&conditions, &ticket(), Utc::now()));

        let conditions = RuleConditions { keywords: Some(vec!["latency".into()]), ..Default::default() };
        assert!(!conditions_match(&conditions, &ticket(), Utc::now()));
    }

    #[test]
    fn thresholds_are_inclusive() {
        let ticket = ticket();
        let conditions = RuleConditions {
            time_threshold_minutes: Some(30),
            affected_users_threshold: Some(250),
            ..Default::default()
        };
        assert!(!conditions_match(&conditions, &ticket, ticket.created_at + Duration::minutes(29)));
        assert!(conditions_match(&conditions, &ticket, ticket.created_at + Duration::minutes(30)));

        let stricter = RuleConditions { affected_users_threshold: Some(251), ..Default::default() };
        assert!(!conditions_match(&stricter, &ticket, Utc::now()));
    }
}

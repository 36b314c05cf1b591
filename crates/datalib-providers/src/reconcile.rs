//! Active/inactive reconciliation of an asset universe against stored assets.
//!
//! A stored asset missing from the fresh "active" listing is only a
//! candidate. It is deactivated right away when the provider's inactive
//! listing confirms it, otherwise only once it has gone [`GRACE_PERIOD_DAYS`]
//! without an update.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use datalib_core::{date_part, Asset};
use tracing::info;

pub const GRACE_PERIOD_DAYS: i64 = 14;
/// Most stale assets sent to the per-asset detail endpoint in one run.
pub const DETAIL_LOOKUP_CAP: usize = 100;

pub fn grace_period() -> Duration {
    Duration::days(GRACE_PERIOD_DAYS)
}

/// Stored-active assets absent from the fetched universe, keyed by id.
pub fn deactivation_candidates(fetched: &[Asset], stored_active: Vec<Asset>) -> HashMap<String, Asset> {
    let fetched_ids: HashSet<String> = fetched.iter().map(Asset::id).collect();
    stored_active
        .into_iter()
        .filter(|asset| !fetched_ids.contains(&asset.id()))
        .map(|asset| {
            info!(ticker = %asset.ticker, composite_figi = %asset.composite_figi, "asset possibly inactive");
            (asset.id(), asset)
        })
        .collect()
}

/// Removes every candidate the inactive listing confirms and returns it
/// deactivated, with the delisting date taken from the confirmation.
pub fn apply_confirmations(candidates: &mut HashMap<String, Asset>, inactive: &[Asset]) -> Vec<Asset> {
    let mut confirmed = Vec::new();
    for listed in inactive {
        if let Some(mut asset) = candidates.remove(&listed.id()) {
            asset.active = false;
            asset.delisting_date = date_part(&listed.delisting_date).to_string();
            asset.last_updated = listed.last_updated;
            info!(
                ticker = %asset.ticker,
                composite_figi = %asset.composite_figi,
                delisted = %asset.delisting_date,
                "confirmed delisting"
            );
            confirmed.push(asset);
        }
    }
    confirmed
}

/// True once `now - last_updated` reaches the grace period.
pub fn grace_expired(now: DateTime<Utc>, last_updated: DateTime<Utc>) -> bool {
    now - last_updated >= grace_period()
}

/// Deactivates the unconfirmed candidates whose grace period has run out,
/// stamping them with `now`. The rest stay active for now.
pub fn expire_unconfirmed(candidates: HashMap<String, Asset>, now: DateTime<Utc>) -> Vec<Asset> {
    let mut expired: Vec<Asset> = candidates
        .into_values()
        .filter(|asset| grace_expired(now, asset.last_updated))
        .map(|mut asset| {
            asset.active = false;
            asset.last_updated = now;
            info!(
                ticker = %asset.ticker,
                composite_figi = %asset.composite_figi,
                "deactivating after grace period"
            );
            asset
        })
        .collect();
    expired.sort_by(|a, b| a.id().cmp(&b.id()));
    expired
}

/// Picks the assets whose details should be fetched this run.
///
/// Assets never stored are always included. Stored assets whose
/// `last_updated` predates the fetched stamp are stale; the `cap` stalest of
/// those, oldest stored stamp first with ties broken by id, are added after
/// them.
pub fn select_detail_lookups(
    fetched: &[Asset],
    stored_last_updated: &HashMap<String, DateTime<Utc>>,
    cap: usize,
) -> Vec<Asset> {
    let mut new = Vec::new();
    let mut stale = Vec::new();
    for asset in fetched {
        match stored_last_updated.get(&asset.id()) {
            None => new.push(asset.clone()),
            Some(stored) if *stored < asset.last_updated => stale.push((*stored, asset)),
            Some(_) => {}
        }
    }

    stale.sort_by(|(a_stamp, a), (b_stamp, b)| {
        a_stamp
            .cmp(b_stamp)
            .then_with(|| a.ticker.cmp(&b.ticker))
            .then_with(|| a.composite_figi.cmp(&b.composite_figi))
    });
    new.extend(stale.into_iter().take(cap).map(|(_, asset)| asset.clone()));
    new
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn asset(ticker: &str, figi: &str, last_updated: DateTime<Utc>) -> Asset {
        Asset {
            ticker: ticker.into(),
            composite_figi: figi.into(),
            active: true,
            last_updated,
            ..Default::default()
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn grace_boundary_is_inclusive() {
        let now = at(20);
        let stamp = now - grace_period();
        assert!(grace_expired(now, stamp));
        assert!(!grace_expired(now, stamp + Duration::seconds(1)));
        assert!(grace_expired(now, stamp - Duration::seconds(1)));
    }

    #[test]
    fn unconfirmed_candidates_wait_out_the_grace_period() {
        let now = at(30);
        let fetched = vec![asset("AAPL", "BBG000B9XRY4", at(29))];
        let stored = vec![
            asset("AAPL", "BBG000B9XRY4", at(28)),
            asset("GONE", "BBG000000002", now - grace_period()),
            asset("BLIP", "BBG000000003", at(25)),
        ];
        let candidates = deactivation_candidates(&fetched, stored);
        assert_eq!(candidates.len(), 2);

        let expired = expire_unconfirmed(candidates, now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].ticker, "GONE");
        assert!(!expired[0].active);
        assert_eq!(expired[0].last_updated, now);
    }

    #[test]
    fn confirmations_deactivate_immediately_with_delisting_day() {
        let stored = vec![asset("OLD", "BBG000000001", at(29)), asset("BLIP", "BBG000000003", at(29))];
        let mut candidates = deactivation_candidates(&[], stored);

        let mut listed = asset("OLD", "BBG000000001", at(30));
        listed.active = false;
        listed.delisting_date = "2020-01-01T00:00:00Z".into();
        let other = asset("ELSE", "BBG000000009", at(30));

        let confirmed = apply_confirmations(&mut candidates, &[other, listed]);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].delisting_date, "2020-01-01");
        assert_eq!(confirmed[0].last_updated, at(30));
        assert!(!confirmed[0].active);
        assert!(candidates.contains_key("BLIP:BBG000000003"));
        assert!(!candidates.contains_key("OLD:BBG000000001"));
    }

    #[test]
    fn detail_lookups_take_new_assets_and_the_stalest_few() {
        let fetched_stamp = at(30);
        let mut fetched = Vec::new();
        let mut stored = HashMap::new();
        for i in 0..150u32 {
            let a = asset(&format!("T{i:03}"), &format!("BBG{i:09}"), fetched_stamp);
            // 50 distinct stored stamps, three assets per stamp
            stored.insert(a.id(), at(1) + Duration::hours(i64::from(i % 50)));
            fetched.push(a);
        }
        let fresh = asset("FRESH", "BBG999999999", at(10));
        stored.insert(fresh.id(), at(10));
        fetched.push(fresh);
        fetched.push(asset("NEW", "BBG888888888", fetched_stamp));

        let picked = select_detail_lookups(&fetched, &stored, DETAIL_LOOKUP_CAP);
        assert_eq!(picked.len(), 1 + DETAIL_LOOKUP_CAP);
        assert_eq!(picked[0].ticker, "NEW");
        assert!(!picked.iter().any(|a| a.ticker == "FRESH"));

        let stale = &picked[1..];
        let stamps: Vec<_> = stale.iter().map(|a| stored[&a.id()]).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "oldest first");
        // 33 full stamp groups plus the first ticker of the 34th
        assert_eq!(stale[0].ticker, "T000");
        assert_eq!(stale[1].ticker, "T050");
        assert_eq!(stale[2].ticker, "T100");
        assert_eq!(stale[99].ticker, "T033");

        let again = select_detail_lookups(&fetched, &stored, DETAIL_LOOKUP_CAP);
        assert_eq!(
            picked.iter().map(Asset::id).collect::<Vec<_>>(),
            again.iter().map(Asset::id).collect::<Vec<_>>()
        );
    }
}

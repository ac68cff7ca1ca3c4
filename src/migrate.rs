//! Lazy schema migration for legacy records.
//!
//! Records written before the augmented layout carry none of the
//! substructures the current schema expects. Migration fills each absent
//! substructure deterministically from whatever legacy fields exist and
//! never overwrites one that is already present, which makes the upgrade
//! idempotent: `migrate(migrate(r)) == migrate(r)` for any record.
//!
//! A successful pass stamps the record with the current schema version.
//! Version-0 records (written before the version field existed) are
//! detected by substructure presence instead, the compatibility importer
//! for pre-versioning data.

use crate::adapter::StorageAdapter;
use crate::error::{Result, StoreError};
use crate::types::{
    Availability, AvailabilityState, Flags, GalleryItem, PersonalInfo, PricePackage, Pricing,
    Profile, Ratings, Record, RecordStatus, Stats, VerificationStatus, CURRENT_SCHEMA_VERSION,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// Flat price assumed when a legacy record carries no contract price.
const DEFAULT_BASE_PRICE: i64 = 50_000;

/// Window after registration during which a profile counts as new.
const NEW_MODEL_WINDOW_DAYS: i64 = 30;

/// Tally of a batch migration run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub success_count: usize,
    pub error_count: usize,
}

/// Whether a record still needs the schema upgrade.
///
/// A record stamped with the current schema version never does. Unstamped
/// records need it when any of the augmentable substructures is absent.
pub fn needs_migration(record: &Record) -> bool {
    if record.schema_version >= CURRENT_SCHEMA_VERSION {
        return false;
    }
    record.profile.is_none() || record.pricing.is_none() || record.availability.is_none()
}

/// Upgrade a record to the current field layout. Returns the input
/// unchanged when no migration is needed. System identity fields (`id`,
/// `createdAt`, `status`) are preserved verbatim.
pub fn migrate(record: &Record) -> Record {
    if !needs_migration(record) {
        return record.clone();
    }

    let mut migrated = record.clone();
    let now = Utc::now();

    if migrated.personal_info.is_none() {
        migrated.personal_info = Some(PersonalInfo {
            name: Some("Unnamed Model".to_string()),
            intro: Some(String::new()),
            description: Some(String::new()),
            categories: Some(Vec::new()),
        });
    }

    let kyc_verified = migrated.kyc.as_ref().map(|k| k.verified).unwrap_or(false);

    if migrated.profile.is_none() {
        let info = migrated.personal_info.clone().unwrap_or_default();
        migrated.profile = Some(Profile {
            tagline: Some(info.intro.clone().unwrap_or_default()),
            experience: Some("1-3 years".to_string()),
            location: None,
            languages: Some(vec!["en".to_string()]),
            bio: Some(info.description.clone().unwrap_or_default()),
            specialties: Some(info.categories.clone().unwrap_or_default()),
            verification_status: Some(VerificationStatus {
                identity: kyc_verified,
                premium: false,
                featured: false,
            }),
        });
    }

    if migrated.pricing.is_none() {
        let base = migrated
            .contract
            .as_ref()
            .and_then(|c| c.base_price.or(c.flat_rate))
            .unwrap_or(DEFAULT_BASE_PRICE);
        migrated.pricing = Some(Pricing {
            currency: "KRW".to_string(),
            packages: derive_packages(base),
        });
    }

    if migrated.availability.is_none() {
        let status = if migrated.status == RecordStatus::Active {
            AvailabilityState::Available
        } else {
            AvailabilityState::Offline
        };
        migrated.availability = Some(Availability {
            status,
            response_time: Some(2),
            last_seen: Some(now),
            auto_reply: Some(
                "Thanks for your message! We'll get back to you shortly.".to_string(),
            ),
        });
    }

    if migrated.stats.is_none() {
        migrated.stats = Some(Stats {
            completed_projects: 0,
            total_clients: 0,
            repeat_clients: 0,
            response_time: Some(2),
            joined_date: migrated.registration_date.or(Some(now)),
        });
    }

    if migrated.ratings.is_none() {
        migrated.ratings = Some(Ratings::default());
    }

    if migrated.flags.is_none() {
        migrated.flags = Some(Flags {
            featured: false,
            verified: kyc_verified,
            new_model: is_new_model(migrated.registration_date, now),
            premium: false,
        });
    }

    if let Some(portfolio) = migrated.portfolio.as_mut() {
        if portfolio.gallery.is_none() {
            portfolio.gallery = Some(
                portfolio
                    .images
                    .as_ref()
                    .map(|images| {
                        images
                            .iter()
                            .map(|img| GalleryItem {
                                id: img.id.clone(),
                                url: img.url.clone(),
                                thumbnail_url: img.url.clone(),
                                category: Some("all".to_string()),
                                caption: Some(img.name.clone().unwrap_or_default()),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            );
        }
    }

    migrated.updated_at = Some(now);
    migrated.schema_version = CURRENT_SCHEMA_VERSION;
    migrated
}

/// Three pricing tiers derived from a single legacy flat price.
fn derive_packages(base: i64) -> Vec<PricePackage> {
    vec![
        PricePackage {
            id: "basic".to_string(),
            name: "Basic".to_string(),
            price: base,
            description: Some("Basic shoot package".to_string()),
            features: vec![
                "2-hour shoot".to_string(),
                "10 edited photos".to_string(),
                "Personal-use license".to_string(),
            ],
            delivery_time: Some(3),
            revisions: Some(1),
            popular: false,
        },
        PricePackage {
            id: "standard".to_string(),
            name: "Standard".to_string(),
            price: base * 2,
            description: Some("Standard shoot package".to_string()),
            features: vec![
                "4-hour shoot".to_string(),
                "30 edited photos".to_string(),
                "Commercial-use license".to_string(),
                "Hair and makeup included".to_string(),
            ],
            delivery_time: Some(5),
            revisions: Some(3),
            popular: true,
        },
        PricePackage {
            id: "premium".to_string(),
            name: "Premium".to_string(),
            price: base * 4,
            description: Some("Premium shoot package".to_string()),
            features: vec![
                "Full-day shoot".to_string(),
                "Unlimited edited photos".to_string(),
                "All raw files included".to_string(),
                "Hair and makeup included".to_string(),
                "Unlimited revisions".to_string(),
            ],
            delivery_time: Some(7),
            revisions: Some(-1),
            popular: false,
        },
    ]
}

fn is_new_model(registered: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match registered {
        None => true,
        Some(date) => date > now - Duration::days(NEW_MODEL_WINDOW_DAYS),
    }
}

/// Migrate every record that needs it, writing each back through the
/// adapter. One record's failure is isolated: it is tallied and the batch
/// continues. Records already on the current layout count as successes.
pub async fn migrate_all(adapter: &StorageAdapter) -> MigrationReport {
    let records = adapter.get_all().await;
    debug!(count = records.len(), "starting batch migration");

    let mut report = MigrationReport::default();
    for record in &records {
        if !needs_migration(record) {
            report.success_count += 1;
            continue;
        }
        match write_back(adapter, record).await {
            Ok(()) => {
                debug!(id = ?record.id, "record migrated");
                report.success_count += 1;
            }
            Err(e) => {
                warn!(id = ?record.id, error = %e, "record migration failed");
                report.error_count += 1;
            }
        }
    }

    debug!(
        success = report.success_count,
        errors = report.error_count,
        "batch migration finished"
    );
    report
}

async fn write_back(adapter: &StorageAdapter, record: &Record) -> Result<()> {
    let id = record.id.clone().ok_or(StoreError::MissingId)?;
    let migrated = migrate(record);
    let value = serde_json::to_value(&migrated)?;
    let patch = value
        .as_object()
        .cloned()
        .ok_or_else(|| StoreError::Serialization("record did not serialize to an object".into()))?;
    adapter.update(&id, &patch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn legacy_record() -> Record {
        serde_json::from_value(json!({
            "id": null,
            "status": "active",
            "contract": { "basePrice": 50000 },
            "personalInfo": { "name": "X" }
        }))
        .unwrap()
    }

    #[test]
    fn test_concrete_migration_scenario() {
        let migrated = migrate(&legacy_record());

        let prices: Vec<i64> = migrated
            .pricing
            .as_ref()
            .unwrap()
            .packages
            .iter()
            .map(|p| p.price)
            .collect();
        assert_eq!(prices, vec![50_000, 100_000, 200_000]);

        assert_eq!(
            migrated.availability.as_ref().unwrap().status,
            AvailabilityState::Available
        );
        assert_eq!(
            migrated.profile.as_ref().unwrap().specialties,
            Some(Vec::new())
        );
        assert!(!migrated.flags.as_ref().unwrap().verified);

        // Identity fields are untouched.
        assert_eq!(migrated.id, None);
        assert_eq!(migrated.status, RecordStatus::Active);
    }

    #[test]
    fn test_migration_is_idempotent() {
        let once = migrate(&legacy_record());
        let twice = migrate(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_present_substructure_is_never_overwritten() {
        let mut record = legacy_record();
        record.profile = Some(Profile {
            tagline: Some("hand-written".to_string()),
            ..Default::default()
        });

        let migrated = migrate(&record);
        assert_eq!(
            migrated.profile.as_ref().unwrap().tagline.as_deref(),
            Some("hand-written")
        );
        // The absent ones were still filled.
        assert!(migrated.pricing.is_some());
        assert!(migrated.availability.is_some());
    }

    #[test]
    fn test_stamped_record_is_left_alone() {
        let migrated = migrate(&legacy_record());
        assert_eq!(migrated.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(!needs_migration(&migrated));
    }

    #[test]
    fn test_version_zero_with_all_substructures_needs_no_migration() {
        let migrated = {
            let mut m = migrate(&legacy_record());
            // Written by an older deployment: fully shaped but unstamped.
            m.schema_version = 0;
            m
        };
        assert!(!needs_migration(&migrated));
        assert_eq!(migrate(&migrated), migrated);
    }

    #[test]
    fn test_inactive_record_gets_offline_availability() {
        let mut record = legacy_record();
        record.status = RecordStatus::Inactive;
        let migrated = migrate(&record);
        assert_eq!(
            migrated.availability.unwrap().status,
            AvailabilityState::Offline
        );
    }

    #[test]
    fn test_pricing_defaults_without_contract() {
        let mut record = legacy_record();
        record.contract = None;
        let migrated = migrate(&record);
        assert_eq!(
            migrated.pricing.unwrap().packages[0].price,
            DEFAULT_BASE_PRICE
        );
    }

    #[test]
    fn test_gallery_lifted_from_legacy_images() {
        let mut record = legacy_record();
        record.portfolio = Some(
            serde_json::from_value(json!({
                "thumbnailUrl": "https://cdn.example.com/t.jpg",
                "images": [
                    { "id": "img1", "url": "https://cdn.example.com/1.jpg", "name": "One" }
                ]
            }))
            .unwrap(),
        );

        let migrated = migrate(&record);
        let gallery = migrated.portfolio.unwrap().gallery.unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].id.as_deref(), Some("img1"));
        assert_eq!(gallery[0].category.as_deref(), Some("all"));
        assert_eq!(gallery[0].caption.as_deref(), Some("One"));
    }

    #[test]
    fn test_new_model_window() {
        let now = Utc::now();
        assert!(is_new_model(None, now));
        assert!(is_new_model(Some(now - Duration::days(5)), now));
        assert!(!is_new_model(Some(now - Duration::days(45)), now));
    }

    proptest! {
        #[test]
        fn prop_migration_idempotent(
            status in prop::sample::select(vec!["pending", "active", "inactive", "suspended"]),
            base_price in prop::option::of(1_000i64..1_000_000),
            has_profile in any::<bool>(),
            has_pricing in any::<bool>(),
            has_availability in any::<bool>(),
        ) {
            let mut raw = json!({ "id": "model_1_abcdefghi", "status": status });
            if let Some(price) = base_price {
                raw["contract"] = json!({ "basePrice": price });
            }
            if has_profile {
                raw["profile"] = json!({ "tagline": "t" });
            }
            if has_pricing {
                raw["pricing"] = json!({ "currency": "KRW", "packages": [] });
            }
            if has_availability {
                raw["availability"] = json!({ "status": "busy" });
            }

            let record: Record = serde_json::from_value(raw).unwrap();
            let once = migrate(&record);
            let twice = migrate(&once);
            prop_assert_eq!(once, twice);
        }
    }
}

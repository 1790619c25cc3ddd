use std::sync::Arc;

use crate::cache::models::{GeoPoint, NearbyEntity, VehicleClass};
use crate::cache::PresenceStore;
use crate::error::AppResult;

/// 候选司机筛选：只查地理索引，不判断业务资格
#[derive(Clone)]
pub struct CandidateSelector {
    presence: Arc<dyn PresenceStore>,
}

impl CandidateSelector {
    pub fn new(presence: Arc<dyn PresenceStore>) -> Self {
        Self { presence }
    }

    /// 半径内未尝试过的司机，按距离升序
    pub async fn find_candidates(
        &self,
        class: VehicleClass,
        pickup: GeoPoint,
        exclude: &[String],
        radius_km: f64,
    ) -> AppResult<Vec<NearbyEntity>> {
        let mut candidates: Vec<NearbyEntity> = self
            .presence
            .nearby(class, pickup, radius_km, exclude)
            .await?
            .into_iter()
            .filter(|c| c.distance_km <= radius_km && !exclude.contains(&c.id))
            .collect();

        // 存储已经排序，这里保证稳定的升序
        candidates.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::cache::models::{AvailabilityStatus, LocationFix};
    use crate::cache::MemoryPresenceStore;

    async fn seeded() -> (Arc<MemoryPresenceStore>, CandidateSelector) {
        let store = Arc::new(MemoryPresenceStore::new(Duration::from_secs(120)));
        let drivers = [
            ("d-near", 1.001, VehicleClass::Car),
            ("d-mid", 1.02, VehicleClass::Car),
            ("d-far", 1.2, VehicleClass::Car),
            ("m-near", 1.0005, VehicleClass::Motorcycle),
        ];
        for (id, lat, class) in drivers {
            let fix = LocationFix::new(class, GeoPoint::new(lat, 1.0), AvailabilityStatus::Available);
            store.set_location(id, &fix).await.expect("seed");
        }
        let selector = CandidateSelector::new(store.clone());
        (store, selector)
    }

    #[rstest]
    #[case(&[], vec!["d-near", "d-mid"])]
    #[case(&["d-near"], vec!["d-mid"])]
    #[case(&["d-near", "d-mid"], vec![])]
    #[tokio::test]
    async fn candidates_are_ordered_and_filtered(
        #[case] exclude: &[&str],
        #[case] expected: Vec<&str>,
    ) {
        let (_, selector) = seeded().await;
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        let found = selector
            .find_candidates(VehicleClass::Car, GeoPoint::new(1.0, 1.0), &exclude, 10.0)
            .await
            .expect("candidates");
        let ids: Vec<&str> = found.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn other_vehicle_classes_are_not_candidates() {
        let (_, selector) = seeded().await;
        let found = selector
            .find_candidates(VehicleClass::Motorcycle, GeoPoint::new(1.0, 1.0), &[], 10.0)
            .await
            .expect("candidates");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "m-near");
    }
}

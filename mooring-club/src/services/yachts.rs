use log::info;
use mooring_core::{
    fields, yacht_image_path, Backend, DocumentPath, FieldEnum, Fields, FilterOp, Query, Record,
    SharedObserver, Subscription,
};
use validator::Validate;

use super::ClubContext;
use crate::{NewYacht, RequireRecord, Result, UpdatedYacht, YachtData, YachtStatus};

/// Manages the fleet.
pub struct YachtService<B: ?Sized> {
    context: ClubContext<B>,
}

impl<B: Backend + ?Sized> YachtService<B> {
    pub fn new(context: &ClubContext<B>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    fn path(id: &str) -> DocumentPath {
        DocumentPath::new(YachtData::COLLECTION, id)
    }

    pub async fn create(&self, new_yacht: NewYacht) -> Result<String> {
        new_yacht.validate()?;

        let fields = fields! {
            "name" => new_yacht.name.as_str(),
            "type" => new_yacht.kind,
            "shortcut" => new_yacht.shortcut,
            "description" => new_yacht.description,
            "status" => new_yacht.status.as_str(),
        };

        let id = self
            .context
            .backend
            .add(YachtData::COLLECTION, fields)
            .await?;

        info!("Added yacht {} ({})", new_yacht.name, id);
        Ok(id)
    }

    /// Writes the provided fields, leaving the rest untouched.
    pub async fn update(&self, updated: UpdatedYacht) -> Result<()> {
        let mut fields = Fields::new();

        if let Some(name) = updated.name {
            fields.insert("name".into(), name.into());
        }
        if let Some(kind) = updated.kind {
            fields.insert("type".into(), kind.into());
        }
        if let Some(shortcut) = updated.shortcut {
            fields.insert("shortcut".into(), shortcut.into());
        }
        if let Some(description) = updated.description {
            fields.insert("description".into(), description.into());
        }

        if fields.is_empty() {
            return Ok(());
        }

        self.context
            .backend
            .update(&Self::path(&updated.id), fields)
            .await?;

        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: YachtStatus) -> Result<()> {
        self.context
            .backend
            .update(&Self::path(id), fields! { "status" => status.as_str() })
            .await?;

        info!("Yacht {} is now {}", id, status);
        Ok(())
    }

    pub async fn yacht(&self, id: &str) -> Result<YachtData> {
        self.context
            .find(id)
            .await?
            .or_not_found(YachtData::COLLECTION, id)
    }

    /// The whole fleet, by name.
    pub async fn list_yachts(&self) -> Result<Vec<YachtData>> {
        let mut yachts = self
            .context
            .list(&Query::collection(YachtData::COLLECTION))
            .await?;
        sort_yachts(&mut yachts);

        Ok(yachts)
    }

    pub fn subscribe_yachts(&self, observer: SharedObserver<Vec<YachtData>>) -> Subscription {
        self.context.watch_records(
            Query::collection(YachtData::COLLECTION),
            observer,
            sort_yachts,
        )
    }

    /// Yachts that can be booked right now.
    pub async fn available_yachts(&self) -> Result<Vec<YachtData>> {
        let query = Query::collection(YachtData::COLLECTION).filter(
            "status",
            FilterOp::Equal,
            YachtStatus::Available.as_str(),
        );

        let mut yachts = self.context.list(&query).await?;
        sort_yachts(&mut yachts);

        Ok(yachts)
    }

    /// Stores the main picture of a yacht and links it.
    pub async fn upload_image(&self, id: &str, bytes: Vec<u8>) -> Result<String> {
        let path = yacht_image_path(id);

        self.context.storage.upload(&path, bytes, "image/jpeg").await?;
        let url = self.context.storage.download_url(&path).await?;

        self.context
            .backend
            .update(&Self::path(id), fields! { "imageUrl" => url.as_str() })
            .await?;

        Ok(url)
    }
}

fn sort_yachts(yachts: &mut [YachtData]) {
    yachts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::services::testing::{harness, recorder};
    use crate::ServiceError;

    fn yacht(name: &str, shortcut: &str) -> NewYacht {
        NewYacht {
            name: name.to_string(),
            kind: "Omega".to_string(),
            shortcut: shortcut.to_string(),
            description: String::new(),
            status: YachtStatus::Available,
        }
    }

    #[tokio::test]
    async fn fleet_is_listed_by_name() {
        let h = harness();
        let yachts = YachtService::new(&h.context);

        yachts.create(yacht("Vega", "V")).await.unwrap();
        yachts.create(yacht("Orion", "O")).await.unwrap();
        let antares = yachts.create(yacht("Antares", "A")).await.unwrap();

        let (observer, seen) = recorder();
        let _subscription = yachts.subscribe_yachts(observer);

        let names: Vec<_> = seen.lock().last().unwrap().iter().map(|y| y.name.clone()).collect();
        assert_eq!(names, vec!["Antares", "Orion", "Vega"]);

        yachts
            .set_status(&antares, YachtStatus::Maintenance)
            .await
            .unwrap();

        let available: Vec<_> = yachts
            .available_yachts()
            .await
            .unwrap()
            .into_iter()
            .map(|y| y.name)
            .collect();
        assert_eq!(available, vec!["Orion", "Vega"]);
    }

    #[tokio::test]
    async fn shortcuts_are_short() {
        let h = harness();
        let yachts = YachtService::new(&h.context);

        assert!(matches!(
            yachts.create(yacht("Orion", "ORION")).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(yachts.list_yachts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn updates_keep_untouched_fields() {
        let h = harness();
        let yachts = YachtService::new(&h.context);
        let id = yachts.create(yacht("Orion", "O")).await.unwrap();

        yachts
            .update(UpdatedYacht {
                id: id.clone(),
                description: Some("Fast and wet".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let orion = yachts.yacht(&id).await.unwrap();
        assert_eq!(orion.kind, "Omega");
        assert_eq!(orion.description, "Fast and wet");
    }

    #[tokio::test]
    async fn images_are_stored_under_the_yacht() {
        let h = harness();
        let yachts = YachtService::new(&h.context);
        let id = yachts.create(yacht("Orion", "O")).await.unwrap();

        let url = yachts.upload_image(&id, vec![0xff]).await.unwrap();

        assert_eq!(url, format!("memory://yachts/{}/main.jpg", id));
        assert_eq!(yachts.yacht(&id).await.unwrap().image_url, Some(url));
    }
}

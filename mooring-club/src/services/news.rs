use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use log::info;
use mooring_core::{
    fields, Backend, DocumentPath, FieldEnum, Fields, FilterOp, Query, Record, SharedObserver,
    Subscription, Value,
};
use validator::Validate;

use super::ClubContext;
use crate::{created_now, NewNews, NewsData, NewsStatus, RequireRecord, Result, UpdatedNews};

/// Club announcements.
pub struct NewsService<B: ?Sized> {
    context: ClubContext<B>,
}

impl<B: Backend + ?Sized> NewsService<B> {
    pub fn new(context: &ClubContext<B>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    fn path(id: &str) -> DocumentPath {
        DocumentPath::new(NewsData::COLLECTION, id)
    }

    /// Publishes an announcement. New items are active.
    pub async fn create(&self, new_news: NewNews) -> Result<String> {
        new_news.validate()?;

        let mut fields = fields! {
            "title" => new_news.title,
            "description" => new_news.description,
            "category" => new_news.category,
            "deactivationDate" => new_news.deactivation_date,
            "status" => NewsStatus::Active.as_str(),
        };
        fields.extend(created_now());

        let id = self.context.backend.add(NewsData::COLLECTION, fields).await?;

        info!("Published news {}", id);
        Ok(id)
    }

    pub async fn update(&self, updated: UpdatedNews) -> Result<()> {
        let mut fields = Fields::new();

        if let Some(title) = updated.title {
            fields.insert("title".into(), title.into());
        }
        if let Some(description) = updated.description {
            fields.insert("description".into(), description.into());
        }
        if let Some(category) = updated.category {
            fields.insert("category".into(), category.into());
        }
        if let Some(deactivation_date) = updated.deactivation_date {
            fields.insert("deactivationDate".into(), Value::from(deactivation_date));
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

    pub async fn news(&self, id: &str) -> Result<NewsData> {
        self.context
            .find(id)
            .await?
            .or_not_found(NewsData::COLLECTION, id)
    }

    /// Watches the active announcements, newest first.
    pub fn subscribe_active(&self, observer: SharedObserver<Vec<NewsData>>) -> Subscription {
        self.context
            .watch_records(active_query(), observer, sort_newest_first)
    }

    /// Marks every active item whose deactivation date has passed as old.
    /// Returns how many were archived.
    pub async fn archive_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<NewsData> = self
            .context
            .list::<NewsData>(&active_query())
            .await?
            .into_iter()
            .filter(|n| n.is_expired_at(now))
            .collect();

        let paths: Vec<_> = expired.iter().map(|n| Self::path(&n.id)).collect();
        let updates = paths.iter().map(|path| {
            self.context
                .backend
                .update(path, fields! { "status" => NewsStatus::Old.as_str() })
        });

        try_join_all(updates).await?;

        if !expired.is_empty() {
            info!("Archived {} expired news items", expired.len());
        }

        Ok(expired.len())
    }
}

fn active_query() -> Query {
    Query::collection(NewsData::COLLECTION).filter(
        "status",
        FilterOp::Equal,
        NewsStatus::Active.as_str(),
    )
}

/// Newest first. Items whose timestamp is still pending are the newest.
fn sort_newest_first(news: &mut [NewsData]) {
    news.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id)));
}

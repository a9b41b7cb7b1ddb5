use std::collections::HashMap;
use std::sync::Arc;

use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

use super::lifecycle::ItemLifecycle;
use crate::model::catalog::{CatalogItem, ItemId};
use crate::model::status::InstallStatus;

/// Independent per-item controllers, keyed by id and kept in catalog order.
#[derive(Debug, Default)]
pub struct ItemRegistry {
    order: Vec<ItemId>,
    items: HashMap<ItemId, ItemLifecycle>,
}

impl ItemRegistry {
    /// Replaces the catalog. Controllers with a command in flight or an open
    /// dialog are kept so neither the result nor the edits are lost.
    pub fn load(&mut self, items: Vec<CatalogItem>) {
        let mut previous = std::mem::take(&mut self.items);
        self.order.clear();

        for item in items {
            if self.items.contains_key(&item.id) {
                tracing::warn!("duplicate catalog id {}", item.id);
                continue;
            }

            let id = item.id.clone();
            let lifecycle = match previous.remove(&id) {
                Some(existing) if existing.in_use() => existing,
                _ => ItemLifecycle::new(Arc::new(item)),
            };
            self.order.push(id.clone());
            self.items.insert(id, lifecycle);
        }

        for (id, orphan) in previous {
            if orphan.is_busy() {
                self.order.push(id.clone());
                self.items.insert(id, orphan);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &ItemId) -> Option<&ItemLifecycle> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &ItemId) -> Option<&mut ItemLifecycle> {
        self.items.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemLifecycle> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    pub fn count_with(&self, status: InstallStatus) -> usize {
        self.items
            .values()
            .filter(|lifecycle| lifecycle.status() == status)
            .count()
    }

    pub fn summary_notification(&self) -> String {
        format!(
            "servers: {} listed, {} installed, {} installing",
            self.len(),
            self.count_with(InstallStatus::Installed),
            self.count_with(InstallStatus::Installing)
        )
    }

    /// Best matches first, over title, creator, description and tags.
    pub fn search(&self, query: &str) -> Vec<&ItemLifecycle> {
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, &ItemLifecycle)> = self
            .iter()
            .filter_map(|lifecycle| {
                let item = lifecycle.item();
                let haystack = format!(
                    "{} {} {} {}",
                    item.title,
                    item.creator,
                    item.tags.join(" "),
                    item.description
                );
                matcher
                    .fuzzy_match(&haystack, query)
                    .map(|score| (score, lifecycle))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, lifecycle)| lifecycle).collect()
    }
}

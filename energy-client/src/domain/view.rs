use serde::{Deserialize, Serialize};

use super::{Entity, EntityId, EntityKind};

/// Which detail view the dashboard shows below the map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entity", rename_all = "snake_case")]
pub enum SelectedView {
    Solar,
    Building(EntityId),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(EntityId),
    #[error("entity '{0}' is not a building")]
    NotABuilding(EntityId),
}

impl SelectedView {
    /// Checks that a building view refers to a configured building.
    pub fn validate(&self, entities: &[Entity]) -> Result<(), ViewError> {
        match self {
            SelectedView::Solar => Ok(()),
            SelectedView::Building(id) => match entities.iter().find(|e| &e.id == id) {
                None => Err(ViewError::UnknownEntity(id.clone())),
                Some(e) if e.kind != EntityKind::Building => Err(ViewError::NotABuilding(id.clone())),
                Some(_) => Ok(()),
            },
        }
    }

    /// Entities whose KPIs belong to this view.
    pub fn entities<'a>(&self, entities: &'a [Entity]) -> Vec<&'a Entity> {
        match self {
            SelectedView::Solar => entities.iter().filter(|e| e.kind == EntityKind::Solar).collect(),
            SelectedView::Building(id) => entities.iter().filter(|e| &e.id == id).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sites() -> Vec<Entity> {
        vec![
            Entity::new("solar_roof", "PV Dach", 51.9375, 7.6257).with_kind(EntityKind::Solar),
            Entity::new("solar_ppa", "PV PPA", 51.9375, 7.6257).with_kind(EntityKind::Solar),
            Entity::new("hiltrup", "Hiltrup", 51.9475, 7.6357),
        ]
    }

    #[test]
    fn solar_view_selects_all_solar_sites() {
        let sites = sites();
        let ids: Vec<_> = SelectedView::Solar.entities(&sites).iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["solar_roof", "solar_ppa"]);
    }

    #[test]
    fn building_view_rejects_unknown_and_solar_ids() {
        let sites = sites();

        assert_eq!(SelectedView::Building("hiltrup".into()).validate(&sites), Ok(()));
        assert_eq!(
            SelectedView::Building("nowhere".into()).validate(&sites),
            Err(ViewError::UnknownEntity("nowhere".into()))
        );
        assert_eq!(
            SelectedView::Building("solar_roof".into()).validate(&sites),
            Err(ViewError::NotABuilding("solar_roof".into()))
        );
    }

    #[test]
    fn view_json_is_tagged() {
        let view: SelectedView = serde_json::from_str(r#"{"kind": "building", "entity": "fab"}"#).unwrap();
        assert_eq!(view, SelectedView::Building("fab".into()));

        let solar = serde_json::to_value(SelectedView::Solar).unwrap();
        assert_eq!(solar, serde_json::json!({"kind": "solar"}));
    }
}

//! Domain types shared by the KPI service and its consumers.

pub mod domain;

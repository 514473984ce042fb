//! Beamline heartbeat ages.
//!
//! The dataserver and controller write one row per beamline; the cluster
//! writes one row per head-node address, which the controller row names.
//! A heartbeat that has never been written reports an age of 100 seconds,
//! old enough to render red.

use super::Database;
use crate::protocol::{BeamlineStatus, Heartbeat};
use anyhow::Result;

pub const MISSING_HEARTBEAT_AGE: i64 = 100;

#[derive(sqlx::FromRow)]
struct AgeRow {
    dataserver_age: Option<i64>,
    controller_age: Option<i64>,
    cluster_age: Option<i64>,
}

impl Database {
    async fn fetch_heartbeat_ages(&self, beamline: &str) -> Result<AgeRow> {
        let row = sqlx::query_as::<_, AgeRow>(
            "SELECT
               (SELECT FLOOR(EXTRACT(EPOCH FROM (NOW() - d.timestamp)))::BIGINT
                  FROM status_dataserver d WHERE d.beamline = $1) AS dataserver_age,
               (SELECT FLOOR(EXTRACT(EPOCH FROM (NOW() - c.timestamp)))::BIGINT
                  FROM status_controller c WHERE c.beamline = $1) AS controller_age,
               (SELECT FLOOR(EXTRACT(EPOCH FROM (NOW() - k.timestamp)))::BIGINT
                  FROM status_cluster k
                  JOIN status_controller c ON k.ip_address = c.cluster_ip
                 WHERE c.beamline = $1) AS cluster_age",
        )
        .bind(beamline)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Heartbeat ages and health levels for a beamline's three services.
    pub async fn beamline_status(&self, beamline: &str) -> Result<BeamlineStatus> {
        let ages = self
            .with_retry("beamline_status", || self.fetch_heartbeat_ages(beamline))
            .await?;
        let beat = |age: Option<i64>| Heartbeat::from_age(age.unwrap_or(MISSING_HEARTBEAT_AGE).max(0));
        Ok(BeamlineStatus {
            beamline: beamline.to_string(),
            dataserver: beat(ages.dataserver_age),
            controller: beat(ages.controller_age),
            cluster: beat(ages.cluster_age),
        })
    }
}

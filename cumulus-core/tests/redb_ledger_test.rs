//! Placement against the persistent ledger

mod common;

use std::sync::Arc;

use common::{fixture_with_ledger, xen_vm, Z1_SNAPSHOT};
use cumulus_core::capacity::open_ledger;
use cumulus_core::config::{CumulusConfig, CumulusConfigBuilder, LedgerBackend, LedgerConfig};
use cumulus_core::types::{DeploymentPlan, MIB};
use cumulus_core::ExcludeList;
use tempfile::TempDir;

fn redb_config(dir: &TempDir) -> CumulusConfig {
    CumulusConfigBuilder::new()
        .ledger(LedgerConfig {
            backend: LedgerBackend::Redb,
            data_dir: dir.path().join("ledger"),
            ..LedgerConfig::default()
        })
        .build()
        .unwrap()
}

#[test]
fn test_reservations_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let config = redb_config(&dir);

    {
        let ledger = open_ledger(&config.ledger).unwrap();
        let fx = fixture_with_ledger(Z1_SNAPSHOT, &config, Arc::clone(&ledger));
        let dest = fx
            .manager
            .plan_deployment(
                &xen_vm(1, 2, 1000, 2048),
                &DeploymentPlan::new(1),
                &mut ExcludeList::new(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(dest.host.id, 1);
    }

    let ledger = open_ledger(&config.ledger).unwrap();
    let h1 = ledger.host_capacity(1).unwrap().unwrap();
    assert_eq!(h1.cpu.used_capacity, 2000);
    assert_eq!(h1.memory.used_capacity, 2048 * MIB);

    // a second placement sees the first one's usage
    let fx = fixture_with_ledger(Z1_SNAPSHOT, &config, ledger);
    fx.manager
        .plan_deployment(
            &xen_vm(2, 2, 1000, 2048),
            &DeploymentPlan::new(1),
            &mut ExcludeList::new(),
        )
        .unwrap()
        .unwrap();
    let h1 = fx.ledger.host_capacity(1).unwrap().unwrap();
    assert_eq!(h1.cpu.used_capacity, 4000);

    // H1 is now full and H2 cannot take another 2000MHz
    assert!(fx
        .manager
        .plan_deployment(
            &xen_vm(3, 2, 1000, 2048),
            &DeploymentPlan::new(1),
            &mut ExcludeList::new(),
        )
        .unwrap()
        .is_none());
}

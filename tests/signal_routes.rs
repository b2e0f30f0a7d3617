//! Table-driven validation of the chip routing tables: every combination a
//! table lists is accepted with the table's function code, every combination
//! it does not list is rejected.

use bm31x_hal::chips::{bm310, bm318};
use bm31x_hal::signal::{resolve, NoRoute, Signal, SignalRoute};

const SIGNALS: &[Signal] = &[
    Signal::UartTx,
    Signal::UartRx,
    Signal::UartRts,
    Signal::UartCts,
    Signal::SpiSclk,
    Signal::SpiMosi,
    Signal::SpiMiso,
    Signal::SpiSs,
    Signal::I2cScl,
    Signal::I2cSda,
];

fn exhaustive(table: &[SignalRoute], pin_count: u8, instance_count: u8) {
    for pin in 0..pin_count {
        for &signal in SIGNALS {
            for instance in 0..instance_count {
                let expected = table
                    .iter()
                    .find(|r| r.pin == pin && r.signal == signal && r.instance == instance)
                    .map(|r| r.func);
                match (resolve(table, pin, signal, instance), expected) {
                    (Ok(func), Some(expected)) => assert_eq!(func, expected),
                    (Err(err), None) => assert_eq!(
                        err,
                        NoRoute {
                            pin,
                            signal,
                            instance
                        }
                    ),
                    (got, expected) => panic!(
                        "pin {} {:?} instance {}: got {:?}, table says {:?}",
                        pin, signal, instance, got, expected
                    ),
                }
            }
        }
    }
}

#[test]
fn bm310_routes_are_exhaustively_validated() {
    // Instance 2 never exists; including it exercises pure-negative rows.
    exhaustive(bm310::ROUTES, 16, 3);
}

#[test]
fn bm318_routes_are_exhaustively_validated() {
    exhaustive(bm318::ROUTES, 32, 3);
}

#[test]
fn bm310_has_single_instances_only() {
    assert!(bm310::ROUTES.iter().all(|r| r.instance == 0));
}

#[test]
fn bm318_is_a_superset_of_bm310_on_shared_pins() {
    for route in bm310::ROUTES {
        assert!(
            bm318::ROUTES.contains(route),
            "route {:?} missing from the BM318 table",
            route
        );
    }
}

#[test]
fn out_of_package_pins_are_rejected() {
    for pin in 16..=255u8 {
        for &signal in SIGNALS {
            assert!(resolve(bm310::ROUTES, pin, signal, 0).is_err());
        }
    }
}

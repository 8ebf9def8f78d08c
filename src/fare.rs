//! Fare computation.
//!
//! Tax and driver fee rules differ between deployments, so both are policies
//! chosen in configuration rather than constants. Every component of a
//! [`FareBreakdown`] is rounded to two decimal places (half-up) and the total
//! is the exact sum of the rounded components.

use std::str::FromStr;

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entities::Vehicle;
use crate::error::{invalid_rate_error, validation_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareBreakdown {
    pub base: Decimal,
    pub distance: Decimal,
    pub tax: Decimal,
    pub driver_fee: Decimal,
    pub total: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum TaxPolicy {
    /// Fixed amount added to every fare.
    Flat(Decimal),
    /// Percentage (e.g. `30` for 30 %) of base + distance fare + driver fee.
    Percentage(Decimal),
}

impl TaxPolicy {
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Flat(amount) | Self::Percentage(amount) if amount.is_sign_negative() => {
                Err(invalid_rate_error())
            }
            _ => Ok(()),
        }
    }

    pub fn apply(&self, subtotal: Decimal) -> Result<Decimal, Error> {
        match self {
            Self::Flat(amount) => Ok(*amount),
            Self::Percentage(percent) => subtotal
                .checked_mul(*percent)
                .and_then(|value| value.checked_div(Decimal::ONE_HUNDRED))
                .ok_or_else(invalid_rate_error),
        }
    }
}

impl FromStr for TaxPolicy {
    type Err = Error;

    /// Parses `flat:<amount>` or `percent:<percent>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, amount) = s
            .split_once(':')
            .ok_or_else(|| validation_error(format!("malformed tax policy '{}'", s)))?;

        let amount = Decimal::from_str(amount.trim())
            .map_err(|_| validation_error(format!("malformed tax amount '{}'", amount)))?;

        let policy = match kind.trim() {
            "flat" => Self::Flat(amount),
            "percent" => Self::Percentage(amount),
            other => return Err(validation_error(format!("unknown tax policy '{}'", other))),
        };

        policy.validate()?;
        Ok(policy)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum DriverFeePolicy {
    Fixed(Decimal),
    /// Use the booked vehicle's driver rate.
    VehicleRate,
}

impl DriverFeePolicy {
    pub fn fee_for(&self, vehicle: &Vehicle) -> Decimal {
        match self {
            Self::Fixed(amount) => *amount,
            Self::VehicleRate => vehicle.driver_rate,
        }
    }
}

impl FromStr for DriverFeePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == "vehicle" {
            return Ok(Self::VehicleRate);
        }

        let amount = Decimal::from_str(s.trim())
            .map_err(|_| validation_error(format!("malformed driver fee '{}'", s)))?;

        if amount.is_sign_negative() {
            return Err(invalid_rate_error());
        }

        Ok(Self::Fixed(amount))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FarePolicy {
    pub rate_per_km: Decimal,
    pub driver_fee: DriverFeePolicy,
    pub tax: TaxPolicy,
}

impl Default for FarePolicy {
    fn default() -> Self {
        Self {
            rate_per_km: Decimal::new(35, 0),
            driver_fee: DriverFeePolicy::Fixed(Decimal::new(500, 0)),
            tax: TaxPolicy::Flat(Decimal::new(25, 0)),
        }
    }
}

impl FarePolicy {
    pub fn quote(
        &self,
        vehicle: &Vehicle,
        distance_km: f64,
        driver_required: bool,
    ) -> Result<FareBreakdown, Error> {
        compute_fare(
            distance_km,
            vehicle.base_rate,
            self.rate_per_km,
            driver_required,
            self.driver_fee.fee_for(vehicle),
            &self.tax,
        )
    }
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Sum of fare components. Rates large enough to overflow are rejected.
fn sum(values: &[Decimal]) -> Result<Decimal, Error> {
    values
        .iter()
        .try_fold(Decimal::ZERO, |total, value| total.checked_add(*value))
        .ok_or_else(invalid_rate_error)
}

pub fn compute_fare(
    distance_km: f64,
    base_rate: Decimal,
    rate_per_km: Decimal,
    driver_required: bool,
    driver_fee: Decimal,
    tax_policy: &TaxPolicy,
) -> Result<FareBreakdown, Error> {
    if base_rate.is_sign_negative() || rate_per_km.is_sign_negative() {
        return Err(invalid_rate_error());
    }

    if driver_fee.is_sign_negative() {
        return Err(invalid_rate_error());
    }

    tax_policy.validate()?;

    if !distance_km.is_finite() {
        return Err(validation_error("distance must be a finite number"));
    }

    let distance_km = Decimal::from_f64(distance_km.max(0.0))
        .ok_or_else(|| validation_error("distance out of range"))?;

    let base = round_money(base_rate);
    let distance = round_money(
        distance_km
            .checked_mul(rate_per_km)
            .ok_or_else(invalid_rate_error)?,
    );
    let driver_fee = match driver_required {
        true => round_money(driver_fee),
        false => Decimal::ZERO,
    };
    let tax = round_money(tax_policy.apply(sum(&[base, distance, driver_fee])?)?);

    Ok(FareBreakdown {
        base,
        distance,
        tax,
        driver_fee,
        total: sum(&[base, distance, tax, driver_fee])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(amount: i64) -> TaxPolicy {
        TaxPolicy::Flat(Decimal::new(amount, 0))
    }

    #[test]
    fn total_is_sum_of_components() {
        let distances = [0.0, 0.4, 1.0, 12.345, 28.305946094213514, 999.99];
        let rates = [(0, 0), (1500, 35), (250, 120), (7, 1)];
        let taxes = [flat(0), flat(25), TaxPolicy::Percentage(Decimal::new(30, 0))];

        for distance in distances {
            for (base, per_km) in rates {
                for tax in taxes.iter() {
                    for driver_required in [true, false] {
                        let fare = compute_fare(
                            distance,
                            Decimal::new(base, 0),
                            Decimal::new(per_km, 0),
                            driver_required,
                            Decimal::new(500, 0),
                            tax,
                        )
                        .unwrap();

                        assert_eq!(
                            fare.total,
                            fare.base + fare.distance + fare.tax + fare.driver_fee
                        );
                        assert!(fare.total >= fare.base);
                        assert!(!fare.distance.is_sign_negative());
                        assert!(!fare.tax.is_sign_negative());
                        assert_eq!(fare.total, round_money(fare.total));
                    }
                }
            }
        }
    }

    #[test]
    fn colombo_to_negombo_scenario() {
        let distance = crate::geo::distance_km(
            crate::entities::Coordinates::new(6.9271, 79.8612),
            crate::entities::Coordinates::new(7.1806, 79.8846),
        )
        .unwrap();

        let fare = compute_fare(
            distance,
            Decimal::new(1500, 0),
            Decimal::new(35, 0),
            true,
            Decimal::new(500, 0),
            &flat(25),
        )
        .unwrap();

        assert_eq!(fare.base, Decimal::new(1500, 0));
        assert_eq!(fare.distance, Decimal::new(99071, 2));
        assert_eq!(fare.tax, Decimal::new(25, 0));
        assert_eq!(fare.driver_fee, Decimal::new(500, 0));
        assert_eq!(fare.total, Decimal::new(301571, 2));
    }

    #[test]
    fn driver_fee_only_when_requested() {
        let fare = compute_fare(
            10.0,
            Decimal::new(1000, 0),
            Decimal::new(10, 0),
            false,
            Decimal::new(750, 0),
            &flat(25),
        )
        .unwrap();

        assert_eq!(fare.driver_fee, Decimal::ZERO);
        assert_eq!(fare.total, Decimal::new(1125, 0));
    }

    #[test]
    fn percentage_tax_applies_to_subtotal() {
        let fare = compute_fare(
            10.0,
            Decimal::new(1000, 0),
            Decimal::new(50, 0),
            true,
            Decimal::new(500, 0),
            &TaxPolicy::Percentage(Decimal::new(30, 0)),
        )
        .unwrap();

        // subtotal 1000 + 500 + 500 = 2000
        assert_eq!(fare.tax, Decimal::new(600, 0));
        assert_eq!(fare.total, Decimal::new(2600, 0));
    }

    #[test]
    fn overflowing_rates_are_rejected() {
        let err = compute_fare(
            28.3,
            Decimal::MAX,
            Decimal::new(35, 0),
            true,
            Decimal::new(500, 0),
            &flat(25),
        )
        .unwrap_err();
        assert_eq!(err, invalid_rate_error());

        let err = compute_fare(
            28.3,
            Decimal::new(1500, 0),
            Decimal::MAX,
            false,
            Decimal::ZERO,
            &flat(0),
        )
        .unwrap_err();
        assert_eq!(err, invalid_rate_error());

        let err = compute_fare(
            1.0,
            Decimal::MAX / Decimal::new(2, 0),
            Decimal::ZERO,
            false,
            Decimal::ZERO,
            &TaxPolicy::Percentage(Decimal::new(30, 0)),
        )
        .unwrap_err();
        assert_eq!(err, invalid_rate_error());
    }

    #[test]
    fn rounds_half_up() {
        let fare = compute_fare(
            1.0,
            Decimal::ZERO,
            Decimal::new(1005, 3),
            false,
            Decimal::ZERO,
            &flat(0),
        )
        .unwrap();

        assert_eq!(fare.distance, Decimal::new(101, 2));
    }

    #[test]
    fn negative_distance_is_clamped() {
        let fare = compute_fare(
            -4.0,
            Decimal::new(100, 0),
            Decimal::new(35, 0),
            false,
            Decimal::ZERO,
            &flat(0),
        )
        .unwrap();

        assert_eq!(fare.distance, Decimal::ZERO);
        assert_eq!(fare.total, Decimal::new(100, 0));
    }

    #[test]
    fn negative_rates_are_rejected() {
        let err = compute_fare(1.0, Decimal::new(-1, 0), Decimal::ONE, false, Decimal::ZERO, &flat(0))
            .unwrap_err();
        assert_eq!(err, invalid_rate_error());

        let err = compute_fare(1.0, Decimal::ONE, Decimal::new(-1, 0), false, Decimal::ZERO, &flat(0))
            .unwrap_err();
        assert_eq!(err, invalid_rate_error());

        let err = compute_fare(1.0, Decimal::ONE, Decimal::ONE, true, Decimal::ZERO, &flat(-5))
            .unwrap_err();
        assert_eq!(err, invalid_rate_error());
    }

    #[test]
    fn non_finite_distance_is_rejected() {
        let err = compute_fare(f64::NAN, Decimal::ONE, Decimal::ONE, false, Decimal::ZERO, &flat(0))
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn parses_policies() {
        assert_eq!("flat:25".parse::<TaxPolicy>().unwrap(), flat(25));
        assert_eq!(
            "percent: 30".parse::<TaxPolicy>().unwrap(),
            TaxPolicy::Percentage(Decimal::new(30, 0))
        );
        assert!("vat:10".parse::<TaxPolicy>().is_err());
        assert!("flat".parse::<TaxPolicy>().is_err());
        assert_eq!("flat:-1".parse::<TaxPolicy>().unwrap_err(), invalid_rate_error());

        assert_eq!(
            "vehicle".parse::<DriverFeePolicy>().unwrap(),
            DriverFeePolicy::VehicleRate
        );
        assert_eq!(
            "750".parse::<DriverFeePolicy>().unwrap(),
            DriverFeePolicy::Fixed(Decimal::new(750, 0))
        );
        assert!("-1".parse::<DriverFeePolicy>().is_err());
    }
}

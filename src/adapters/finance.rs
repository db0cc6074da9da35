//! Mortgage payment and equity projections.
//!
//! Pure computation; nothing here touches the network. Invalid input is
//! reported as a permanent adapter error so the financing step fails
//! without retrying.

use super::AdapterError;
use crate::domain::{EquityPoint, Financing, FinancingScenario, LoanType};

const SERVICE: &str = "financing";

pub const TERM_YEARS: u32 = 30;

const PROPERTY_TAX_RATE: f64 = 0.011;
const HOME_INSURANCE_RATE: f64 = 0.0035;
const APPRECIATION_RATE: f64 = 0.03;

const CONVENTIONAL_DOWN_PAYMENT: f64 = 0.20;
const FHA_DOWN_PAYMENT: f64 = 0.035;
const FHA_UPFRONT_MIP: f64 = 0.0175;
const FHA_ANNUAL_MIP: f64 = 0.0055;

const EQUITY_YEARS: [u32; 6] = [5, 10, 15, 20, 25, 30];

/// Both loan scenarios for a list price at an annual interest rate (percent)
pub fn financing(price: f64, interest_rate: f64) -> Result<Financing, AdapterError> {
    Ok(Financing {
        conventional_loan: scenario(LoanType::Conventional, price, interest_rate)?,
        fha_loan: scenario(LoanType::Fha, price, interest_rate)?,
    })
}

/// Monthly payment breakdown and equity projection for one loan type
pub fn scenario(
    loan_type: LoanType,
    price: f64,
    interest_rate: f64,
) -> Result<FinancingScenario, AdapterError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(AdapterError::permanent(
            SERVICE,
            format!("price must be positive, got {}", price),
        ));
    }
    if !interest_rate.is_finite() || interest_rate < 0.0 {
        return Err(AdapterError::permanent(
            SERVICE,
            format!("interest rate must be non-negative, got {}", interest_rate),
        ));
    }

    let (down_payment, loan_amount, annual_mi_rate) = match loan_type {
        LoanType::Conventional => {
            let down = price * CONVENTIONAL_DOWN_PAYMENT;
            (down, price - down, 0.0)
        }
        LoanType::Fha => {
            let down = price * FHA_DOWN_PAYMENT;
            // Upfront premium is financed into the loan
            (down, (price - down) * (1.0 + FHA_UPFRONT_MIP), FHA_ANNUAL_MIP)
        }
    };

    let monthly_rate = interest_rate / 100.0 / 12.0;
    let payments = TERM_YEARS * 12;
    let principal_and_interest = monthly_payment(loan_amount, monthly_rate, payments);

    let mortgage_insurance = loan_amount * annual_mi_rate / 12.0;
    let property_tax = price * PROPERTY_TAX_RATE / 12.0;
    let home_insurance = price * HOME_INSURANCE_RATE / 12.0;
    let total = principal_and_interest + mortgage_insurance + property_tax + home_insurance;

    let equity = EQUITY_YEARS
        .iter()
        .map(|&year| {
            let home_value = price * (1.0 + APPRECIATION_RATE).powi(year as i32);
            let balance =
                remaining_balance(loan_amount, monthly_rate, principal_and_interest, year * 12);
            EquityPoint {
                year,
                home_value: cents(home_value),
                loan_balance: cents(balance),
                equity: cents(home_value - balance),
            }
        })
        .collect();

    Ok(FinancingScenario {
        loan_type,
        price: cents(price),
        interest_rate,
        term_years: TERM_YEARS,
        down_payment: cents(down_payment),
        loan_amount: cents(loan_amount),
        principal_and_interest: cents(principal_and_interest),
        mortgage_insurance: cents(mortgage_insurance),
        property_tax: cents(property_tax),
        home_insurance: cents(home_insurance),
        total_monthly_payment: cents(total),
        equity,
    })
}

/// Fixed-rate amortized payment
fn monthly_payment(principal: f64, monthly_rate: f64, payments: u32) -> f64 {
    if monthly_rate == 0.0 {
        return principal / payments as f64;
    }
    let growth = (1.0 + monthly_rate).powi(payments as i32);
    principal * monthly_rate * growth / (growth - 1.0)
}

/// Principal still owed after `months` payments
fn remaining_balance(principal: f64, monthly_rate: f64, payment: f64, months: u32) -> f64 {
    let balance = if monthly_rate == 0.0 {
        principal - payment * months as f64
    } else {
        let growth = (1.0 + monthly_rate).powi(months as i32);
        principal * growth - payment * (growth - 1.0) / monthly_rate
    };
    balance.max(0.0)
}

fn cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {} ± {}, got {}",
            expected,
            tolerance,
            actual
        );
    }

    #[test]
    fn test_conventional_breakdown() {
        let s = scenario(LoanType::Conventional, 300000.0, 5.49).unwrap();

        assert_eq!(s.down_payment, 60000.0);
        assert_eq!(s.loan_amount, 240000.0);
        close(s.principal_and_interest, 1361.2, 0.5);
        assert_eq!(s.mortgage_insurance, 0.0);
        assert_eq!(s.property_tax, 275.0);
        assert_eq!(s.home_insurance, 87.5);
        close(
            s.total_monthly_payment,
            s.principal_and_interest + 275.0 + 87.5,
            0.02,
        );
    }

    #[test]
    fn test_fha_finances_upfront_premium() {
        let s = scenario(LoanType::Fha, 300000.0, 5.49).unwrap();

        assert_eq!(s.down_payment, 10500.0);
        close(s.loan_amount, 294566.25, 0.01);
        close(s.mortgage_insurance, 135.01, 0.01);
        assert!(s.principal_and_interest > 1361.2);
    }

    #[test]
    fn test_equity_projection() {
        let s = scenario(LoanType::Conventional, 300000.0, 5.49).unwrap();

        let years: Vec<u32> = s.equity.iter().map(|p| p.year).collect();
        assert_eq!(years, vec![5, 10, 15, 20, 25, 30]);

        // Equity grows every period and the loan is paid off at term
        assert!(s.equity.windows(2).all(|w| w[1].equity > w[0].equity));
        let last = s.equity.last().unwrap();
        close(last.loan_balance, 0.0, 0.01);
        close(last.home_value, 728178.74, 1.0);
    }

    #[test]
    fn test_zero_rate() {
        let s = scenario(LoanType::Conventional, 360000.0, 0.0).unwrap();
        assert_eq!(s.principal_and_interest, 800.0);
    }

    #[test]
    fn test_invalid_input_is_permanent() {
        for price in [0.0, -1.0, f64::NAN] {
            let err = financing(price, 5.49).unwrap_err();
            assert!(!err.is_transient());
        }
        assert!(financing(300000.0, -2.0).is_err());
    }
}

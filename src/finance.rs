use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{Assumptions, LoanConfig, TaxConfig};
use crate::costs;
use crate::types::{CalendarMonth, EntityType, Month};

/// How a loan's principal and upfront fee were arrived at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanSizing {
    /// Principal before fees: the override, or the auto-sized amount.
    pub base: f64,
    pub fee: f64,
    /// Amount owed at month 0; includes the fee when it is financed.
    pub principal: f64,
    /// Fee paid out of opening cash; 0 when financed.
    pub fee_paid_in_cash: f64,
}

impl LoanSizing {
    pub fn new(cfg: &LoanConfig, auto_sized: f64) -> Self {
        let base = cfg.principal_override.unwrap_or(auto_sized).max(0.0);
        let fee = base * cfg.fee_rate;
        if cfg.finance_fees {
            LoanSizing { base, fee, principal: base + fee, fee_paid_in_cash: 0.0 }
        } else {
            LoanSizing { base, fee, principal: base, fee_paid_in_cash: fee }
        }
    }
}

/// One month of a loan's schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanPayment {
    pub interest: f64,
    pub principal: f64,
    /// Balance after this payment.
    pub balance: f64,
}

impl LoanPayment {
    pub fn total(&self) -> f64 {
        self.interest + self.principal
    }
}

/// Interest-only window followed by a level annuity that retires the balance
/// exactly in the final month of the term.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    monthly_rate: f64,
    io_months: u32,
    term_months: u32,
    amortizing_payment: f64,
    balance: f64,
    months_paid: u32,
}

impl Loan {
    pub fn new(principal: f64, cfg: &LoanConfig) -> Self {
        let monthly_rate = cfg.annual_rate / Month::MONTHS_PER_YEAR as f64;
        let term_months = cfg.term_years * Month::MONTHS_PER_YEAR;
        let io_months = cfg.io_months.min(term_months);
        let amortizing_months = term_months - io_months;
        Loan {
            monthly_rate,
            io_months,
            term_months,
            amortizing_payment: annuity_payment(principal, monthly_rate, amortizing_months),
            balance: principal.max(0.0),
            months_paid: 0,
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Level payment after the interest-only window.
    pub fn amortizing_payment(&self) -> f64 {
        self.amortizing_payment
    }

    pub fn is_retired(&self) -> bool {
        self.balance <= 0.0 || self.months_paid >= self.term_months
    }

    /// Make this month's payment and advance the schedule.
    pub fn pay_month(&mut self) -> LoanPayment {
        if self.is_retired() {
            return LoanPayment { interest: 0.0, principal: 0.0, balance: self.balance };
        }
        self.months_paid += 1;
        let interest = self.balance * self.monthly_rate;

        let principal = if self.months_paid == self.term_months {
            self.balance
        } else if self.months_paid <= self.io_months {
            0.0
        } else {
            (self.amortizing_payment - interest).clamp(0.0, self.balance)
        };

        self.balance -= principal;
        if self.months_paid == self.term_months {
            self.balance = 0.0;
        }
        LoanPayment { interest, principal, balance: self.balance }
    }
}

/// Closed-form level payment `P·r / (1 − (1+r)^−n)`, with the `r = 0` limit `P / n`.
pub fn annuity_payment(principal: f64, monthly_rate: f64, months: u32) -> f64 {
    if months == 0 || principal <= 0.0 {
        return 0.0;
    }
    let n = months as f64;
    if monthly_rate.abs() < 1e-12 {
        return principal / n;
    }
    let payment = principal * monthly_rate / (1.0 - (1.0 + monthly_rate).powf(-n));
    if payment.is_finite() {
        payment
    } else {
        warn!(target: "claysim::numeric", principal, monthly_rate, months, "annuity payment undefined; using straight-line");
        principal / n
    }
}

/// Both loans, sized and ready to amortize, plus the opening cash position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Financing {
    pub capex_sizing: LoanSizing,
    pub working_capital_sizing: LoanSizing,
    pub capex_loan: Loan,
    pub working_capital_loan: Loan,
    /// Owner equity + loan proceeds − capital expenditure − fees paid in cash.
    pub opening_cash: f64,
}

impl Financing {
    pub fn new(a: &Assumptions) -> Self {
        let f = &a.financing;
        let capex_spend = f.capex_total * (1.0 + f.capex_contingency);
        let capex_sizing = LoanSizing::new(&f.capex_loan, capex_spend + f.capex_buffer);
        let working_capital_sizing = LoanSizing::new(
            &f.working_capital_loan,
            f.runway_months * costs::baseline_monthly_opex(a) + f.runway_buffer,
        );

        let opening_cash = f.owner_equity + capex_sizing.base + working_capital_sizing.base
            - capex_spend
            - capex_sizing.fee_paid_in_cash
            - working_capital_sizing.fee_paid_in_cash;

        Financing {
            capex_loan: Loan::new(capex_sizing.principal, &f.capex_loan),
            working_capital_loan: Loan::new(working_capital_sizing.principal, &f.working_capital_loan),
            capex_sizing,
            working_capital_sizing,
            opening_cash,
        }
    }

    /// Pay both loans for the month, capex loan first.
    pub fn pay_month(&mut self) -> DebtService {
        DebtService {
            capex: self.capex_loan.pay_month(),
            working_capital: self.working_capital_loan.pay_month(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DebtService {
    pub capex: LoanPayment,
    pub working_capital: LoanPayment,
}

impl DebtService {
    pub fn total(&self) -> f64 {
        self.capex.total() + self.working_capital.total()
    }

    pub fn interest(&self) -> f64 {
        self.capex.interest + self.working_capital.interest
    }

    pub fn principal(&self) -> f64 {
        self.capex.principal + self.working_capital.principal
    }
}

/// Operating cash flow over debt service; `None` when nothing is owed.
pub fn dscr(operating_cash_flow: f64, debt_service: f64) -> Option<f64> {
    (debt_service > 0.0).then(|| operating_cash_flow / debt_service)
}

pub fn is_covenant_breach(dscr: Option<f64>, covenant: f64) -> bool {
    dscr.is_some_and(|d| d < covenant)
}

/// Annual tax liability on year-to-date figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub income: f64,
    pub social_security: f64,
    pub medicare: f64,
    pub corporate: f64,
}

impl TaxBreakdown {
    pub fn total(&self) -> f64 {
        self.income + self.social_security + self.medicare + self.corporate
    }
}

/// Tax owed for a year with `profit` taxable business profit (after owner
/// salary, if any) and `salary` paid to the owner.
pub fn annual_tax(cfg: &TaxConfig, profit: f64, salary: f64) -> TaxBreakdown {
    let profit = profit.max(0.0);
    match cfg.entity {
        EntityType::PassThrough => pass_through_tax(cfg, profit, 0.0),
        EntityType::SalarySplit => {
            let salary = salary.max(0.0);
            let payroll_ss_base = salary.min(cfg.social_security_wage_base);
            let remainder = pass_through_tax(cfg, profit, payroll_ss_base);
            TaxBreakdown {
                income: salary * cfg.personal_income_rate + remainder.income,
                social_security: payroll_ss_base * cfg.social_security_rate + remainder.social_security,
                medicare: salary * cfg.medicare_rate + remainder.medicare,
                corporate: 0.0,
            }
        }
        EntityType::TaxableCorporation => TaxBreakdown {
            corporate: profit * cfg.corporate_rate,
            ..TaxBreakdown::default()
        },
    }
}

/// Income tax plus self-employment tax on `profit`. Social Security applies
/// only to the part of the wage base not already used by `wages_taxed`.
fn pass_through_tax(cfg: &TaxConfig, profit: f64, wages_taxed: f64) -> TaxBreakdown {
    let se_base = profit * cfg.self_employment_factor;
    let wage_base_left = (cfg.social_security_wage_base - wages_taxed).max(0.0);
    TaxBreakdown {
        income: profit * cfg.personal_income_rate,
        social_security: se_base.min(wage_base_left) * cfg.social_security_rate,
        medicare: se_base * cfg.medicare_rate,
        corporate: 0.0,
    }
}

/// Year-to-date tax accrual. Each month accrues the non-negative increase in
/// annual liability; the ledger resets in January.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxLedger {
    tax_year: u32,
    ytd_profit: f64,
    ytd_salary: f64,
    accrued: f64,
}

impl TaxLedger {
    pub fn accrue(
        &mut self,
        cfg: &TaxConfig,
        month: Month,
        start: CalendarMonth,
        pre_tax_profit: f64,
        owner_salary: f64,
    ) -> f64 {
        let year = tax_year(month, start);
        if year != self.tax_year {
            *self = TaxLedger { tax_year: year, ..TaxLedger::default() };
        }
        self.ytd_profit += pre_tax_profit;
        self.ytd_salary += owner_salary;
        let liability = annual_tax(cfg, self.ytd_profit, self.ytd_salary).total();
        let due = (liability - self.accrued).max(0.0);
        self.accrued += due;
        due
    }

    pub fn accrued(&self) -> f64 {
        self.accrued
    }
}

/// Number of Januaries passed since `Month(1)`, counting month 1 as year 0.
fn tax_year(month: Month, start: CalendarMonth) -> u32 {
    (start.0 as u32 - 1 + month.0.saturating_sub(1)) / Month::MONTHS_PER_YEAR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan_cfg(rate: f64, years: u32, io: u32) -> LoanConfig {
        LoanConfig {
            annual_rate: rate,
            term_years: years,
            io_months: io,
            principal_override: None,
            fee_rate: 0.0,
            finance_fees: false,
        }
    }

    fn run_to_term(loan: &mut Loan) -> Vec<LoanPayment> {
        (0..loan.term_months).map(|_| loan.pay_month()).collect()
    }

    #[test]
    fn loan_closes_exactly_at_term() {
        let cfg = loan_cfg(0.07, 20, 6);
        let mut loan = Loan::new(100_000.0, &cfg);
        let schedule = run_to_term(&mut loan);
        assert_eq!(schedule.len(), 240);
        assert_eq!(loan.balance(), 0.0);
        let repaid: f64 = schedule.iter().map(|p| p.principal).sum();
        assert!((repaid - 100_000.0).abs() < 1e-6, "repaid {repaid}");
        assert!(schedule.iter().all(|p| p.balance >= 0.0));
    }

    #[test]
    fn zero_rate_loan_is_straight_line() {
        let cfg = loan_cfg(0.0, 1, 0);
        let mut loan = Loan::new(1_200.0, &cfg);
        assert!((loan.amortizing_payment() - 100.0).abs() < 1e-12);
        let schedule = run_to_term(&mut loan);
        assert!(schedule.iter().all(|p| p.interest == 0.0));
        assert_eq!(loan.balance(), 0.0);
    }

    #[test]
    fn interest_only_window_pays_no_principal() {
        let cfg = loan_cfg(0.12, 5, 6);
        let mut loan = Loan::new(10_000.0, &cfg);
        for _ in 0..6 {
            let p = loan.pay_month();
            assert_eq!(p.principal, 0.0);
            assert!((p.interest - 100.0).abs() < 1e-9);
        }
        let first_amortizing = loan.pay_month();
        assert!(first_amortizing.principal > 0.0);
        assert!((first_amortizing.total() - loan.amortizing_payment()).abs() < 1e-9);
    }

    #[test]
    fn retired_loan_pays_nothing() {
        let cfg = loan_cfg(0.05, 1, 0);
        let mut loan = Loan::new(500.0, &cfg);
        run_to_term(&mut loan);
        assert_eq!(loan.pay_month().total(), 0.0);
        assert!(loan.is_retired());
    }

    #[test]
    fn financed_fee_rolls_into_principal() {
        let mut cfg = loan_cfg(0.07, 20, 0);
        cfg.fee_rate = 0.03;
        cfg.finance_fees = true;
        let s = LoanSizing::new(&cfg, 100_000.0);
        assert!((s.principal - 103_000.0).abs() < 1e-9);
        assert_eq!(s.fee_paid_in_cash, 0.0);

        cfg.finance_fees = false;
        let s = LoanSizing::new(&cfg, 100_000.0);
        assert_eq!(s.principal, 100_000.0);
        assert!((s.fee_paid_in_cash - 3_000.0).abs() < 1e-9);
    }

    #[test]
    fn principal_override_wins_over_auto_sizing() {
        let mut cfg = loan_cfg(0.07, 20, 0);
        cfg.principal_override = Some(42_000.0);
        assert_eq!(LoanSizing::new(&cfg, 1.0e6).base, 42_000.0);
    }

    #[test]
    fn opening_cash_reconciles() {
        let a = Assumptions::canonical();
        let f = Financing::new(&a);
        let fin = &a.financing;
        let expected = fin.owner_equity + f.capex_sizing.base + f.working_capital_sizing.base
            - fin.capex_total * (1.0 + fin.capex_contingency)
            - f.working_capital_sizing.fee_paid_in_cash;
        assert!((f.opening_cash - expected).abs() < 1e-6);
        // buffers and runway leave the studio with positive opening cash
        assert!(f.opening_cash > 0.0);
    }

    #[test]
    fn dscr_undefined_without_debt_service() {
        assert_eq!(dscr(1_000.0, 0.0), None);
        assert!(!is_covenant_breach(None, 1.25));
        assert_eq!(dscr(2_500.0, 2_000.0), Some(1.25));
        assert!(is_covenant_breach(dscr(2_000.0, 2_000.0), 1.25));
        assert!(!is_covenant_breach(dscr(2_500.0, 2_000.0), 1.25));
    }

    #[test]
    fn pass_through_caps_social_security_at_wage_base() {
        let cfg = Assumptions::canonical().tax;
        let t = annual_tax(&cfg, 1.0e6, 0.0);
        assert!((t.social_security - cfg.social_security_wage_base * cfg.social_security_rate).abs() < 1e-6);
        let se_base = 1.0e6 * cfg.self_employment_factor;
        assert!((t.medicare - se_base * cfg.medicare_rate).abs() < 1e-6, "medicare is uncapped");
    }

    #[test]
    fn losses_owe_no_tax() {
        let mut cfg = Assumptions::canonical().tax;
        for entity in [EntityType::PassThrough, EntityType::TaxableCorporation] {
            cfg.entity = entity;
            assert_eq!(annual_tax(&cfg, -5_000.0, 0.0).total(), 0.0);
        }
    }

    #[test]
    fn salary_split_taxes_remainder_as_pass_through() {
        let mut cfg = Assumptions::canonical().tax;
        cfg.entity = EntityType::SalarySplit;
        let t = annual_tax(&cfg, 20_000.0, 42_000.0);
        let se_base = 20_000.0 * cfg.self_employment_factor;
        let ss_base = 42_000.0 + se_base.min(cfg.social_security_wage_base - 42_000.0);
        assert!((t.income - 62_000.0 * cfg.personal_income_rate).abs() < 1e-9);
        assert!((t.social_security - ss_base * cfg.social_security_rate).abs() < 1e-9);
        assert!((t.medicare - (42_000.0 + se_base) * cfg.medicare_rate).abs() < 1e-9);
        assert_eq!(t.corporate, 0.0);
    }

    #[test]
    fn salary_split_without_salary_matches_pass_through() {
        let mut cfg = Assumptions::canonical().tax;
        cfg.entity = EntityType::PassThrough;
        let pass_through = annual_tax(&cfg, 20_000.0, 0.0);
        cfg.entity = EntityType::SalarySplit;
        let split = annual_tax(&cfg, 20_000.0, 0.0);
        assert!((split.total() - pass_through.total()).abs() < 1e-9);
        assert!((split.social_security - pass_through.social_security).abs() < 1e-9);
    }

    #[test]
    fn salary_split_shares_social_security_wage_base() {
        let mut cfg = Assumptions::canonical().tax;
        cfg.entity = EntityType::SalarySplit;
        let salary = cfg.social_security_wage_base + 10_000.0;
        let t = annual_tax(&cfg, 50_000.0, salary);
        assert!((t.social_security - cfg.social_security_wage_base * cfg.social_security_rate).abs() < 1e-6);
        let se_base = 50_000.0 * cfg.self_employment_factor;
        assert!((t.medicare - (salary + se_base) * cfg.medicare_rate).abs() < 1e-6);
    }

    #[test]
    fn corporation_pays_corporate_rate_only() {
        let mut cfg = Assumptions::canonical().tax;
        cfg.entity = EntityType::TaxableCorporation;
        let t = annual_tax(&cfg, 10_000.0, 0.0);
        assert_eq!(t.income + t.social_security + t.medicare, 0.0);
        assert!((t.corporate - 10_000.0 * cfg.corporate_rate).abs() < 1e-9);
    }

    #[test]
    fn ytd_accrual_sums_to_annual_liability() {
        let cfg = Assumptions::canonical().tax;
        let mut ledger = TaxLedger::default();
        let profits = [2_000.0, -500.0, 3_000.0, 1_000.0];
        let mut paid = 0.0;
        for (i, p) in profits.iter().enumerate() {
            paid += ledger.accrue(&cfg, Month(i as u32 + 1), CalendarMonth::JANUARY, *p, 0.0);
        }
        let expected = annual_tax(&cfg, profits.iter().sum(), 0.0).total();
        assert!((paid - expected).abs() < 1e-9, "paid {paid} vs {expected}");
    }

    #[test]
    fn ledger_resets_in_january() {
        let cfg = Assumptions::canonical().tax;
        let mut ledger = TaxLedger::default();
        let start = CalendarMonth(11);
        ledger.accrue(&cfg, Month(1), start, 5_000.0, 0.0);
        ledger.accrue(&cfg, Month(2), start, 5_000.0, 0.0);
        let before = ledger.accrued();
        // Month 3 is January
        let jan = ledger.accrue(&cfg, Month(3), start, 1_000.0, 0.0);
        assert!(before > 0.0);
        assert!((ledger.accrued() - jan).abs() < 1e-12);
        assert!((jan - annual_tax(&cfg, 1_000.0, 0.0).total()).abs() < 1e-9);
    }
}

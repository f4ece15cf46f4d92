use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Figures pulled from the data warehouse for an offer's external reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DwFinancials {
    pub total_income: Decimal,
    pub material_costs: Decimal,
    pub employee_costs: Decimal,
    pub other_costs: Decimal,
    pub net_result: Decimal,
}

impl DwFinancials {
    pub fn total_costs(&self) -> Decimal {
        self.material_costs + self.employee_costs + self.other_costs
    }

    /// Sums general-ledger lines into income and cost buckets by account number.
    ///
    /// Income accounts hold credits (negative amounts) and are negated so income reads positive.
    pub fn from_ledger(lines: &[LedgerLine]) -> Self {
        let mut income = Decimal::ZERO;
        let mut material = Decimal::ZERO;
        let mut employee = Decimal::ZERO;
        let mut other = Decimal::ZERO;

        for line in lines {
            match AccountClass::of(line.account) {
                Some(AccountClass::Income) => income += line.amount,
                Some(AccountClass::Material) => material += line.amount,
                Some(AccountClass::Employee) => employee += line.amount,
                Some(AccountClass::Other) => other += line.amount,
                None => {}
            }
        }

        let total_income = -income;
        Self {
            total_income,
            material_costs: material,
            employee_costs: employee,
            other_costs: other,
            net_result: total_income - material - employee - other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub account: u32,
    pub amount: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountClass {
    Income,
    Material,
    Employee,
    Other,
}

impl AccountClass {
    pub fn of(account: u32) -> Option<Self> {
        match account {
            3000..=3999 => Some(Self::Income),
            4000..=4999 => Some(Self::Material),
            5000..=5999 => Some(Self::Employee),
            6000.. => Some(Self::Other),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{AccountClass, DwFinancials, LedgerLine};

    fn line(account: u32, amount: i64) -> LedgerLine {
        LedgerLine { account, amount: Decimal::new(amount, 0) }
    }

    #[test]
    fn classifies_account_ranges() {
        assert_eq!(AccountClass::of(1920), None);
        assert_eq!(AccountClass::of(3000), Some(AccountClass::Income));
        assert_eq!(AccountClass::of(4999), Some(AccountClass::Material));
        assert_eq!(AccountClass::of(5100), Some(AccountClass::Employee));
        assert_eq!(AccountClass::of(7790), Some(AccountClass::Other));
    }

    #[test]
    fn ledger_income_is_negated_and_net_result_derived() {
        let financials = DwFinancials::from_ledger(&[
            line(3000, -1_000),
            line(3100, -500),
            line(4000, 300),
            line(5000, 200),
            line(6500, 100),
            line(2400, 9_999),
        ]);

        assert_eq!(financials.total_income, Decimal::new(1_500, 0));
        assert_eq!(financials.material_costs, Decimal::new(300, 0));
        assert_eq!(financials.employee_costs, Decimal::new(200, 0));
        assert_eq!(financials.other_costs, Decimal::new(100, 0));
        assert_eq!(financials.total_costs(), Decimal::new(600, 0));
        assert_eq!(financials.net_result, Decimal::new(900, 0));
    }

    #[test]
    fn empty_ledger_is_all_zero() {
        assert_eq!(DwFinancials::from_ledger(&[]), DwFinancials::default());
    }
}

use super::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPrice {
  pub denom: String,
  pub low: u64,
  pub average: u64,
  pub high: u64,
}

/// Aggregate fee statistics per denomination over a window of tx results.
/// Txs that paid no fee are ignored; denominations nobody paid in do not
/// appear. The average is the integer mean.
pub fn aggregate<'a>(txs: impl IntoIterator<Item = &'a TxResult>) -> Vec<GasPrice> {
  struct Group {
    low: u64,
    high: u64,
    total: u128,
    count: u128,
  }

  let mut groups: BTreeMap<String, Group> = BTreeMap::new();

  for tx in txs {
    let fee = &tx.response.fee;
    if fee.denom.is_empty() || fee.amount == 0 {
      continue;
    }

    groups
      .entry(fee.denom.clone())
      .and_modify(|group| {
        group.low = group.low.min(fee.amount);
        group.high = group.high.max(fee.amount);
        group.total += u128::from(fee.amount);
        group.count += 1;
      })
      .or_insert(Group {
        low: fee.amount,
        high: fee.amount,
        total: u128::from(fee.amount),
        count: 1,
      });
  }

  groups
    .into_iter()
    .map(|(denom, group)| GasPrice {
      denom,
      low: group.low,
      average: u64::try_from(group.total / group.count).unwrap(),
      high: group.high,
    })
    .collect()
}

use std::cmp::Ordering;

use super::shared::*;
use itertools::Itertools;

/// 牌型，从大到小：豹子 > 同花顺 > 同花 > 顺子 > 对子 > 单张
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandRank {
    HighCard = 1,  // 单张（AKJ最大，352最小）
    Pair,          // 对子（AAK最大，223最小）
    Straight,      // 顺子（AKQ最大，A23最小）
    Flush,         // 同花（AKJ最大，352最小）
    StraightFlush, // 同花顺（AKQ最大，A23最小）
    Triple,        // 豹子（AAA最大，222最小）
}

/// 判断牌型
pub fn classify(hand: &Hand) -> HandRank {
    if is_triple(hand) {
        return HandRank::Triple;
    }

    if is_flush(hand) {
        if is_straight(hand) {
            return HandRank::StraightFlush;
        }
        return HandRank::Flush;
    }

    if is_straight(hand) {
        return HandRank::Straight;
    }

    if is_pair(hand) {
        return HandRank::Pair;
    }

    HandRank::HighCard
}

/// 比较两手牌
/// 流程：1.先比较牌型，牌型大者直接获胜  2.牌型一样进行点数和花色比较
/// 一副牌中不存在两张相同的牌，所以不同的两手牌必定能分出大小
pub fn compare(hand: &Hand, other: &Hand) -> Ordering {
    let rank = classify(hand);
    let other_rank = classify(other);
    if rank != other_rank {
        return rank.cmp(&other_rank);
    }

    let keys = sorted_keys(hand);
    let other_keys = sorted_keys(other);

    // 循环从大到小依次比较点数，如果当前点数相同则比较下一张
    for (key, other_key) in keys.iter().zip(other_keys.iter()) {
        let cmp = (key / 10).cmp(&(other_key / 10));
        if cmp != Ordering::Equal {
            return cmp;
        }
    }

    // 点数完全一样时比较最大一张的花色
    (keys[0] % 10).cmp(&(other_keys[0] % 10))
}

/// 是否大过对方
pub fn beats(hand: &Hand, other: &Hand) -> bool {
    compare(hand, other) == Ordering::Greater
}

/// 三张牌从大到小的编码序列，规则：点数*10+花色
/// 特殊情况处理：A23顺子是最小的顺子，A降为1
fn sorted_keys(hand: &Hand) -> [u16; 3] {
    let mut keys: Vec<u16> = hand
        .0
        .iter()
        .map(|card| card.code() as u16)
        .sorted()
        .rev()
        .collect();

    if is_straight(hand) && keys[0] / 10 == 14 && keys[1] / 10 == 3 && keys[2] / 10 == 2 {
        keys[0] = 10 + keys[0] % 10;
    }

    [keys[0], keys[1], keys[2]]
}

/// 是否同花
fn is_flush(hand: &Hand) -> bool {
    hand.0[0].suit == hand.0[1].suit && hand.0[1].suit == hand.0[2].suit
}

/// 是否顺子
fn is_straight(hand: &Hand) -> bool {
    let values: Vec<u8> = hand
        .0
        .iter()
        .map(|card| card.rank.value())
        .sorted()
        .rev()
        .collect();

    let consecutive = values[0] == values[1] + 1 && values[1] == values[2] + 1;
    // A23特殊顺子情况处理
    let wheel = values[0] == 14 && values[1] == 3 && values[2] == 2;
    consecutive || wheel
}

/// 是否对子
fn is_pair(hand: &Hand) -> bool {
    let [a, b, c] = hand.0;
    a.rank == b.rank || a.rank == c.rank || b.rank == c.rank
}

/// 是否豹子
fn is_triple(hand: &Hand) -> bool {
    hand.0[0].rank == hand.0[1].rank && hand.0[1].rank == hand.0[2].rank
}

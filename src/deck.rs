use std::collections::HashMap;

use rand::Rng;
use rand::seq::SliceRandom;

use super::shared::*;

/// 一副52张扑克牌
#[derive(Debug, Clone)]
pub struct Deck(pub Vec<Card>);

impl Deck {
    /// 初始化52张牌并洗牌
    pub fn shuffled() -> Self {
        let suits = [Suit::Diamonds, Suit::Clubs, Suit::Hearts, Suit::Spades];
        let ranks = [
            Rank::Two,
            Rank::Three,
            Rank::Four,
            Rank::Five,
            Rank::Six,
            Rank::Seven,
            Rank::Eight,
            Rank::Nine,
            Rank::Ten,
            Rank::Jack,
            Rank::Queen,
            Rank::King,
            Rank::Ace,
        ];

        let mut cards = Vec::with_capacity(52);
        for &rank in &ranks {
            for &suit in &suits {
                cards.push(Card { rank, suit });
            }
        }

        let mut rng = rand::rng();
        cards.shuffle(&mut rng);
        Deck(cards)
    }

    /// 切牌，随机数 1-51，最少切一张牌，最多切51张牌
    pub fn cut(&mut self) {
        let mut rng = rand::rng();
        let index = rng.random_range(1..self.0.len().max(2));
        self.cut_at(index);
    }

    pub fn cut_at(&mut self, index: usize) {
        let len = self.0.len();
        self.0.rotate_left(index % len);
    }

    /// 发牌，每个用户轮流发一张，共三轮
    pub fn deal(&self, user_ids: &[i64]) -> HashMap<i64, Hand> {
        let mut dealt: HashMap<i64, Vec<Card>> = HashMap::new();
        let mut index = 0;
        for _ in 0..3 {
            for &user_id in user_ids {
                dealt.entry(user_id).or_default().push(self.0[index]);
                index += 1;
            }
        }

        dealt
            .into_iter()
            .map(|(user_id, cards)| (user_id, Hand([cards[0], cards[1], cards[2]])))
            .collect()
    }
}

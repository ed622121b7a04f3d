use std::ops::{Deref, DerefMut};

use dsvrando_game::{ItemId, Token};
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

/// The set of tokens acquired so far. Only membership matters: adding a token twice is the
/// same as adding it once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    tokens: HashSet<Token>,
}

impl Inventory {
    pub fn new() -> Self {
        Inventory::default()
    }

    pub fn add(&mut self, token: Token) {
        self.tokens.insert(token);
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.tokens.contains(token)
    }

    pub fn has_item(&self, item_id: ItemId) -> bool {
        self.tokens.contains(&Token::Item(item_id))
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.tokens.contains(&Token::Flag(name.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }
}

impl FromIterator<Token> for Inventory {
    fn from_iter<I: IntoIterator<Item = Token>>(iter: I) -> Self {
        Inventory {
            tokens: iter.into_iter().collect(),
        }
    }
}

impl Extend<Token> for Inventory {
    fn extend<I: IntoIterator<Item = Token>>(&mut self, iter: I) {
        self.tokens.extend(iter);
    }
}

/// Temporary changes to an inventory. The original contents are restored when this is dropped,
/// whether the scope is left normally, through `?`, or by unwinding.
pub struct ScopedInventory<'a> {
    inventory: &'a mut Inventory,
    snapshot: Inventory,
}

impl<'a> ScopedInventory<'a> {
    pub fn new(inventory: &'a mut Inventory) -> Self {
        let snapshot = inventory.clone();
        ScopedInventory {
            inventory,
            snapshot,
        }
    }

    /// Puts back the original contents, keeping the scope open for further changes.
    pub fn reset(&mut self) {
        self.inventory.clone_from(&self.snapshot);
    }

    pub fn original(&self) -> &Inventory {
        &self.snapshot
    }
}

impl Deref for ScopedInventory<'_> {
    type Target = Inventory;

    fn deref(&self) -> &Inventory {
        self.inventory
    }
}

impl DerefMut for ScopedInventory<'_> {
    fn deref_mut(&mut self) -> &mut Inventory {
        self.inventory
    }
}

impl Drop for ScopedInventory<'_> {
    fn drop(&mut self) {
        std::mem::swap(self.inventory, &mut self.snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let mut inventory = Inventory::new();
        inventory.add(Token::Item(5));
        inventory.add(Token::Item(5));
        inventory.add(Token::Flag("villagerjacob".to_string()));
        assert_eq!(inventory.len(), 2);
        assert!(inventory.has_item(5));
        assert!(!inventory.has_item(6));
        assert!(inventory.has_flag("villagerjacob"));
        assert!(!inventory.has_flag("villagereugen"));
    }

    #[test]
    fn test_scoped_restores_on_drop() {
        let mut inventory: Inventory = [Token::Item(1)].into_iter().collect();
        {
            let mut scoped = ScopedInventory::new(&mut inventory);
            scoped.add(Token::Item(2));
            assert!(scoped.has_item(2));
            scoped.reset();
            assert!(!scoped.has_item(2));
            scoped.add(Token::Item(3));
            assert_eq!(scoped.original().len(), 1);
        }
        let expected: Inventory = [Token::Item(1)].into_iter().collect();
        assert_eq!(inventory, expected);
    }

    #[test]
    fn test_scoped_restores_on_error() {
        fn add_then_fail(inventory: &mut Inventory) -> Result<(), String> {
            let mut scoped = ScopedInventory::new(inventory);
            scoped.add(Token::Item(9));
            Err::<(), String>("failed".to_string())?;
            Ok(())
        }
        let mut inventory = Inventory::new();
        assert!(add_then_fail(&mut inventory).is_err());
        assert!(inventory.is_empty());
    }

    #[test]
    fn test_scoped_restores_on_panic() {
        let mut inventory = Inventory::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut scoped = ScopedInventory::new(&mut inventory);
            scoped.add(Token::Item(9));
            panic!("evaluation failed");
        }));
        assert!(result.is_err());
        assert!(inventory.is_empty());
    }
}

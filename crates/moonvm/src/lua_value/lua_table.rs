use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::lua_value::{LuaValue, lua_convert};
use crate::lua_vm::{LuaError, LuaResult};

/// The Lua table: a dense array part indexed from 1, a hash part for
/// every other key, and an independent metatable slot. Shared by
/// reference; all mutation goes through interior mutability.
pub struct LuaTable {
    data: RefCell<TableData>,
}

struct TableData {
    arr: Vec<LuaValue>,
    map: AHashMap<LuaValue, LuaValue>,
    meta: Option<Rc<LuaTable>>,
}

impl LuaTable {
    pub fn new(n_arr: usize, n_rec: usize) -> Rc<LuaTable> {
        Rc::new(LuaTable {
            data: RefCell::new(TableData {
                arr: Vec::with_capacity(n_arr),
                map: AHashMap::with_capacity(n_rec),
                meta: None,
            }),
        })
    }

    /// Integral floats canonicalize to integers so that `t[2.0]` and
    /// `t[2]` name the same slot.
    fn normalize_key(key: LuaValue) -> LuaValue {
        if let LuaValue::Float(f) = key {
            if let Some(i) = lua_convert::float_to_integer(f) {
                return LuaValue::Integer(i);
            }
        }
        key
    }

    /// Raw read. Reading with a nil or NaN key is permitted and yields
    /// nil; only writes reject such keys.
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        let key = Self::normalize_key(key.clone());
        let data = self.data.borrow();
        if let LuaValue::Integer(i) = key {
            if i >= 1 && (i as usize) <= data.arr.len() {
                return data.arr[i as usize - 1].clone();
            }
        }
        data.map.get(&key).cloned().unwrap_or(LuaValue::Nil)
    }

    /// Integer fast path used by the registry and SETLIST.
    pub fn get_int(&self, i: i64) -> LuaValue {
        self.get(&LuaValue::Integer(i))
    }

    /// Raw write. Nil deletes; writing at `#t + 1` appends to the array
    /// part and pulls any newly contiguous hash entries in after it.
    pub fn put(&self, key: LuaValue, val: LuaValue) -> LuaResult<()> {
        if key.is_nil() {
            return Err(LuaError::table_key("table index is nil"));
        }
        if let LuaValue::Float(f) = key {
            if f.is_nan() {
                return Err(LuaError::table_key("table index is NaN"));
            }
        }

        let key = Self::normalize_key(key);
        let mut data = self.data.borrow_mut();
        if let LuaValue::Integer(i) = key {
            if i >= 1 {
                let arr_len = data.arr.len() as i64;
                if i <= arr_len {
                    let is_nil = val.is_nil();
                    data.arr[i as usize - 1] = val;
                    if i == arr_len && is_nil {
                        Self::shrink_array(&mut data);
                    }
                    return Ok(());
                }
                if i == arr_len + 1 {
                    data.map.remove(&key);
                    if !val.is_nil() {
                        data.arr.push(val);
                        Self::expand_array(&mut data);
                    }
                    return Ok(());
                }
            }
        }

        if val.is_nil() {
            data.map.remove(&key);
        } else {
            data.map.insert(key, val);
        }
        Ok(())
    }

    pub fn put_int(&self, i: i64, val: LuaValue) {
        // integer keys can never fail the nil/NaN check
        let _ = self.put(LuaValue::Integer(i), val);
    }

    /// Migrate hash entries that became contiguous with the array part.
    fn expand_array(data: &mut TableData) {
        loop {
            let next = LuaValue::Integer(data.arr.len() as i64 + 1);
            match data.map.remove(&next) {
                Some(v) => data.arr.push(v),
                None => break,
            }
        }
    }

    /// Drop trailing nils so the array length stays a valid border.
    fn shrink_array(data: &mut TableData) {
        while matches!(data.arr.last(), Some(LuaValue::Nil)) {
            data.arr.pop();
        }
    }

    /// The length operator: the array-part length, which is always a
    /// border (`t[#t] ~= nil`, `t[#t + 1] == nil` as far as the array
    /// part is concerned).
    pub fn len(&self) -> i64 {
        self.data.borrow().arr.len() as i64
    }

    pub fn metatable(&self) -> Option<Rc<LuaTable>> {
        self.data.borrow().meta.clone()
    }

    pub fn set_metatable(&self, mt: Option<Rc<LuaTable>>) {
        self.data.borrow_mut().meta = mt;
    }

    /// Stateless iteration: nil starts, the array portion comes first
    /// in index order, then the hash portion in its (stable between
    /// mutations) map order. Returns `None` when exhausted; a key that
    /// is not present in the table at all is an error.
    pub fn next(&self, key: &LuaValue) -> LuaResult<Option<(LuaValue, LuaValue)>> {
        let key = Self::normalize_key(key.clone());
        let data = self.data.borrow();

        let arr_from = match &key {
            LuaValue::Nil => Some(0usize),
            LuaValue::Integer(i) if *i >= 1 && (*i as usize) <= data.arr.len() => Some(*i as usize),
            _ => None,
        };

        if let Some(from) = arr_from {
            for (idx, v) in data.arr.iter().enumerate().skip(from) {
                if !v.is_nil() {
                    return Ok(Some((LuaValue::Integer(idx as i64 + 1), v.clone())));
                }
            }
            return Ok(data.map.iter().next().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut iter = data.map.iter();
        while let Some((k, _)) = iter.next() {
            if *k == key {
                return Ok(iter.next().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Err(LuaError::table_key("invalid key to 'next'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_laws() {
        let t = LuaTable::new(0, 0);
        t.put(LuaValue::str("k"), LuaValue::Integer(7)).unwrap();
        assert_eq!(t.get(&LuaValue::str("k")), LuaValue::Integer(7));
        t.put(LuaValue::str("k"), LuaValue::Nil).unwrap();
        assert_eq!(t.get(&LuaValue::str("k")), LuaValue::Nil);
    }

    #[test]
    fn nil_and_nan_keys_are_rejected() {
        let t = LuaTable::new(0, 0);
        assert!(t.put(LuaValue::Nil, LuaValue::Integer(1)).is_err());
        assert!(t.put(LuaValue::Float(f64::NAN), LuaValue::Integer(1)).is_err());
        // reads are lenient
        assert_eq!(t.get(&LuaValue::Nil), LuaValue::Nil);
    }

    #[test]
    fn float_keys_canonicalize() {
        let t = LuaTable::new(0, 0);
        t.put(LuaValue::Float(2.0), LuaValue::str("two")).unwrap();
        assert_eq!(t.get(&LuaValue::Integer(2)), LuaValue::str("two"));
        assert_eq!(t.get(&LuaValue::Integer(2)), t.get(&LuaValue::Float(2.0)));
        t.put(LuaValue::Integer(1), LuaValue::str("one")).unwrap();
        // 2.0 became integer 2, so the array now reaches it
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn array_hash_migration() {
        let t = LuaTable::new(0, 0);
        t.put_int(1, LuaValue::str("a"));
        t.put_int(2, LuaValue::str("b"));
        t.put_int(4, LuaValue::str("d"));
        assert_eq!(t.len(), 2);
        t.put_int(3, LuaValue::str("c"));
        // 4 migrates from the hash part once 3 fills the gap
        assert_eq!(t.len(), 4);
        assert_eq!(t.get_int(3), LuaValue::str("c"));
        assert_eq!(t.get_int(4), LuaValue::str("d"));
    }

    #[test]
    fn deleting_the_last_slot_shrinks() {
        let t = LuaTable::new(0, 0);
        for i in 1..=4 {
            t.put_int(i, LuaValue::Integer(i * 10));
        }
        t.put_int(3, LuaValue::Nil);
        assert_eq!(t.len(), 4);
        t.put_int(4, LuaValue::Nil);
        // trailing nils collapse back to the last non-nil index
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn border_property() {
        let t = LuaTable::new(0, 0);
        for i in 1..=5 {
            t.put_int(i, LuaValue::Integer(i));
        }
        let n = t.len();
        for i in 1..=n {
            assert!(!t.get_int(i).is_nil());
        }
        assert!(t.get_int(n + 1).is_nil());
    }

    #[test]
    fn next_visits_everything_once() {
        let t = LuaTable::new(0, 0);
        t.put_int(1, LuaValue::Integer(10));
        t.put_int(2, LuaValue::Integer(20));
        t.put(LuaValue::str("x"), LuaValue::Integer(30)).unwrap();
        t.put(LuaValue::str("y"), LuaValue::Integer(40)).unwrap();

        let mut seen = Vec::new();
        let mut key = LuaValue::Nil;
        while let Some((k, v)) = t.next(&key).unwrap() {
            seen.push(v.as_integer().unwrap());
            key = k;
        }
        seen.sort();
        assert_eq!(seen, vec![10, 20, 30, 40]);
        // the array portion is visited first, in order
        let first = t.next(&LuaValue::Nil).unwrap().unwrap();
        assert_eq!(first.0, LuaValue::Integer(1));
        let second = t.next(&first.0).unwrap().unwrap();
        assert_eq!(second.0, LuaValue::Integer(2));
    }

    #[test]
    fn next_on_missing_key_errors() {
        let t = LuaTable::new(0, 0);
        t.put_int(1, LuaValue::Integer(1));
        assert!(t.next(&LuaValue::str("ghost")).is_err());
    }

    #[test]
    fn metatable_slot_is_independent() {
        let t = LuaTable::new(0, 0);
        let mt = LuaTable::new(0, 0);
        assert!(t.metatable().is_none());
        t.set_metatable(Some(mt.clone()));
        assert!(Rc::ptr_eq(&t.metatable().unwrap(), &mt));
        t.set_metatable(None);
        assert!(t.metatable().is_none());
    }
}

//! 结构化克隆序列化器
//!
//! GENERIC 原始值的负载格式。设计上参考 V8 `ValueSerializer` 的线格式：
//! 一个 `0xFF, version` 头部，之后是单字节标签 + 负载的递归编码。
//!
//! | 标签 | 含义                                   |
//! |------|----------------------------------------|
//! | `_`  | undefined                              |
//! | `0`  | null                                   |
//! | `T`/`F` | true / false                        |
//! | `I`  | int32，zig-zag varint                  |
//! | `U`  | uint32，varint                         |
//! | `N`  | double，f64 小端                       |
//! | `Z`  | bigint，zig-zag varint (截断到 64 位)  |
//! | `S`  | UTF-8 字符串，varint 长度 + 字节       |
//! | `o` ... `{` n | 普通对象，键值对 + 属性数    |
//! | `A` n ... `$` 0 n | 稠密数组                 |
//! | `;` ... `:` 2n | Map                         |
//! | `'` ... `,` n | Set                          |
//! | `D`  | Date，f64 毫秒                         |
//! | `B`  | ArrayBuffer，varint 长度 + 字节        |
//! | `^`  | 对象回引用，varint 对象 ID             |
//!
//! 对象（含数组、Map、Set、Date、ArrayBuffer）在写入内容之前按出现顺序
//! 分配 ID，因此循环引用与共享子对象都能还原。函数、Symbol、
//! SharedArrayBuffer 与宿主句柄包装对象无法克隆：错误会先交给 [`SerializerDelegate`]，
//! 再以 [`SerializeError::DataClone`] 返回。

use super::embedding::HANDLE_KEY_PROPERTY;
use super::intrinsics::Intrinsics;
use crate::core::error::{SerializeError, SerializeResult};
use rquickjs::{Array, ArrayBuffer, BigInt, Ctx, Object, Value};

/// 当前格式版本
pub const SERIALIZER_VERSION: u32 = 15;

mod tag {
    pub const VERSION: u8 = 0xFF;
    pub const PADDING: u8 = 0x00;
    pub const UNDEFINED: u8 = b'_';
    pub const NULL: u8 = b'0';
    pub const TRUE: u8 = b'T';
    pub const FALSE: u8 = b'F';
    pub const INT32: u8 = b'I';
    pub const UINT32: u8 = b'U';
    pub const DOUBLE: u8 = b'N';
    pub const BIGINT: u8 = b'Z';
    pub const UTF8_STRING: u8 = b'S';
    pub const BEGIN_OBJECT: u8 = b'o';
    pub const END_OBJECT: u8 = b'{';
    pub const BEGIN_DENSE_ARRAY: u8 = b'A';
    pub const END_DENSE_ARRAY: u8 = b'$';
    pub const BEGIN_MAP: u8 = b';';
    pub const END_MAP: u8 = b':';
    pub const BEGIN_SET: u8 = b'\'';
    pub const END_SET: u8 = b',';
    pub const DATE: u8 = b'D';
    pub const ARRAY_BUFFER: u8 = b'B';
    pub const OBJECT_REFERENCE: u8 = b'^';
}

/// 克隆错误回调
pub trait SerializerDelegate {
    fn throw_data_clone_error(&self, message: &str);
}

/// 默认回调：只记录日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelegate;

impl SerializerDelegate for LogDelegate {
    fn throw_data_clone_error(&self, message: &str) {
        if message.is_empty() {
            return;
        }
        tracing::error!(target: "bridge::serializer", "Serialization error: {}", message);
    }
}

// ============================================================================
// 序列化
// ============================================================================

/// 结构化克隆序列化器
pub struct ValueSerializer<'a, 'js> {
    ctx: Ctx<'js>,
    intrinsics: &'a Intrinsics<'js>,
    delegate: &'a dyn SerializerDelegate,
    buffer: Vec<u8>,
    objects: Vec<Object<'js>>,
    max_depth: usize,
}

impl<'a, 'js> ValueSerializer<'a, 'js> {
    pub fn new(
        ctx: Ctx<'js>,
        intrinsics: &'a Intrinsics<'js>,
        delegate: &'a dyn SerializerDelegate,
        max_depth: usize,
    ) -> Self {
        Self {
            ctx,
            intrinsics,
            delegate,
            buffer: Vec::new(),
            objects: Vec::new(),
            max_depth,
        }
    }

    /// 写入格式头
    pub fn write_header(&mut self) {
        self.buffer.push(tag::VERSION);
        self.write_varint(SERIALIZER_VERSION as u64);
    }

    /// 写入原始字节（不带标签）
    pub fn write_raw_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// 写入一个值
    pub fn write_value(&mut self, value: &Value<'js>) -> SerializeResult<()> {
        self.write_value_at(value, 0)
    }

    /// 取出缓冲区
    pub fn release(self) -> Vec<u8> {
        self.buffer
    }

    fn clone_error(&self, message: String) -> SerializeError {
        self.delegate.throw_data_clone_error(&message);
        SerializeError::DataClone(message)
    }

    fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buffer.push(byte);
                break;
            }
            self.buffer.push(byte | 0x80);
        }
    }

    fn write_zigzag(&mut self, value: i64) {
        self.write_varint(((value << 1) ^ (value >> 63)) as u64);
    }

    fn write_string(&mut self, s: &str) {
        self.buffer.push(tag::UTF8_STRING);
        self.write_varint(s.len() as u64);
        self.buffer.extend_from_slice(s.as_bytes());
    }

    fn write_value_at(&mut self, value: &Value<'js>, depth: usize) -> SerializeResult<()> {
        if depth > self.max_depth {
            return Err(SerializeError::DepthExceeded(self.max_depth));
        }

        if value.is_undefined() {
            self.buffer.push(tag::UNDEFINED);
        } else if value.is_null() {
            self.buffer.push(tag::NULL);
        } else if let Some(b) = value.as_bool() {
            self.buffer.push(if b { tag::TRUE } else { tag::FALSE });
        } else if let Some(i) = value.as_int() {
            self.buffer.push(tag::INT32);
            self.write_zigzag(i as i64);
        } else if let Some(n) = value.as_float() {
            self.buffer.push(tag::DOUBLE);
            self.buffer.extend_from_slice(&n.to_le_bytes());
        } else if let Some(big) = value.as_big_int() {
            let v = big.clone().to_i64()?;
            self.buffer.push(tag::BIGINT);
            self.write_zigzag(v);
        } else if let Some(s) = value.as_string() {
            let s = s.to_string()?;
            self.write_string(&s);
        } else if let Some(object) = value.as_object() {
            self.write_object(value, object, depth)?;
        } else {
            return Err(self.clone_error(format!(
                "{} could not be cloned",
                type_name(value)
            )));
        }
        Ok(())
    }

    fn write_object(
        &mut self,
        value: &Value<'js>,
        object: &Object<'js>,
        depth: usize,
    ) -> SerializeResult<()> {
        if value.is_function() {
            return Err(self.clone_error("function could not be cloned".to_string()));
        }
        if self.intrinsics.is_shared_array_buffer(object) {
            return Err(self.clone_error("#<SharedArrayBuffer> could not be cloned".to_string()));
        }
        if is_host_wrapper(object) {
            return Err(self.clone_error("#<BaseObject> could not be cloned".to_string()));
        }

        if let Some(id) = self
            .objects
            .iter()
            .position(|seen| seen.as_value() == object.as_value())
        {
            self.buffer.push(tag::OBJECT_REFERENCE);
            self.write_varint(id as u64);
            return Ok(());
        }
        self.objects.push(object.clone());

        if let Some(array) = value.as_array() {
            return self.write_array(array, depth);
        }
        if let Some(buffer) = ArrayBuffer::from_object(object.clone()) {
            let bytes = buffer.as_bytes().unwrap_or_default();
            self.buffer.push(tag::ARRAY_BUFFER);
            self.write_varint(bytes.len() as u64);
            self.buffer.extend_from_slice(bytes);
            return Ok(());
        }
        if self.intrinsics.is_map(object) {
            let entries = self.intrinsics.map_entries(object)?;
            self.buffer.push(tag::BEGIN_MAP);
            for i in 0..entries.len() {
                let item: Value = entries.get(i)?;
                self.write_value_at(&item, depth + 1)?;
            }
            self.buffer.push(tag::END_MAP);
            self.write_varint(entries.len() as u64);
            return Ok(());
        }
        if self.intrinsics.is_set(object) {
            let values = self.intrinsics.set_values(object)?;
            self.buffer.push(tag::BEGIN_SET);
            for i in 0..values.len() {
                let item: Value = values.get(i)?;
                self.write_value_at(&item, depth + 1)?;
            }
            self.buffer.push(tag::END_SET);
            self.write_varint(values.len() as u64);
            return Ok(());
        }
        if self.intrinsics.is_date(object) {
            let millis = self.intrinsics.date_value(object)?;
            self.buffer.push(tag::DATE);
            self.buffer.extend_from_slice(&millis.to_le_bytes());
            return Ok(());
        }

        self.buffer.push(tag::BEGIN_OBJECT);
        let mut count = 0u64;
        for key in object.keys::<String>() {
            let key = key?;
            let item: Value = object.get(key.as_str())?;
            self.write_string(&key);
            self.write_value_at(&item, depth + 1)?;
            count += 1;
        }
        self.buffer.push(tag::END_OBJECT);
        self.write_varint(count);
        Ok(())
    }

    fn write_array(&mut self, array: &Array<'js>, depth: usize) -> SerializeResult<()> {
        let len = array.len();
        self.buffer.push(tag::BEGIN_DENSE_ARRAY);
        self.write_varint(len as u64);
        for i in 0..len {
            let item: Value = array.get(i)?;
            self.write_value_at(&item, depth + 1)?;
        }
        self.buffer.push(tag::END_DENSE_ARRAY);
        self.write_varint(0);
        self.write_varint(len as u64);
        Ok(())
    }

    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }
}

/// 宿主句柄的包装对象带有隐藏的句柄键
fn is_host_wrapper(object: &Object<'_>) -> bool {
    object
        .get::<_, Value>(HANDLE_KEY_PROPERTY)
        .map(|key| key.is_number())
        .unwrap_or_else(|_| {
            let _ = object.ctx().catch();
            false
        })
}

fn type_name(value: &Value<'_>) -> &'static str {
    if value.is_symbol() {
        "Symbol()"
    } else {
        "value"
    }
}

// ============================================================================
// 反序列化
// ============================================================================

/// 结构化克隆反序列化器
pub struct ValueDeserializer<'a, 'js> {
    ctx: Ctx<'js>,
    intrinsics: &'a Intrinsics<'js>,
    data: &'a [u8],
    position: usize,
    objects: Vec<Value<'js>>,
    max_depth: usize,
    version: u32,
}

impl<'a, 'js> ValueDeserializer<'a, 'js> {
    pub fn new(
        ctx: Ctx<'js>,
        intrinsics: &'a Intrinsics<'js>,
        data: &'a [u8],
        max_depth: usize,
    ) -> Self {
        Self {
            ctx,
            intrinsics,
            data,
            position: 0,
            objects: Vec::new(),
            max_depth,
            version: 0,
        }
    }

    /// 读取并校验格式头，返回版本号
    pub fn read_header(&mut self) -> SerializeResult<u32> {
        match self.read_byte()? {
            tag::VERSION => {}
            _ => return Err(SerializeError::InvalidHeader),
        }
        let version = self.read_varint()? as u32;
        if version == 0 || version > SERIALIZER_VERSION {
            return Err(SerializeError::UnsupportedVersion(version));
        }
        self.version = version;
        Ok(version)
    }

    /// 读取 `len` 个原始字节，不足时返回 `None`
    pub fn read_raw_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(len)?;
        let bytes = self.data.get(self.position..end)?;
        self.position = end;
        Some(bytes)
    }

    /// 剩余未读字节数
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// 读取一个值
    pub fn read_value(&mut self) -> SerializeResult<Value<'js>> {
        self.read_value_at(0)
    }

    fn read_byte(&mut self) -> SerializeResult<u8> {
        let byte = *self
            .data
            .get(self.position)
            .ok_or(SerializeError::UnexpectedEnd(self.position))?;
        self.position += 1;
        Ok(byte)
    }

    fn peek_byte(&self) -> SerializeResult<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(SerializeError::UnexpectedEnd(self.position))
    }

    fn read_exact(&mut self, len: usize) -> SerializeResult<&'a [u8]> {
        let offset = self.position;
        self.read_raw_bytes(len)
            .ok_or(SerializeError::UnexpectedEnd(offset))
    }

    fn read_varint(&mut self) -> SerializeResult<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let offset = self.position;
            let byte = self.read_byte()?;
            if shift >= 64 {
                return Err(SerializeError::InvalidTag { tag: byte, offset });
            }
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn read_zigzag(&mut self) -> SerializeResult<i64> {
        let raw = self.read_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    fn read_f64(&mut self) -> SerializeResult<f64> {
        let bytes = self.read_exact(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    fn read_utf8(&mut self) -> SerializeResult<String> {
        let len = self.read_varint()? as usize;
        let offset = self.position;
        let bytes = self.read_exact(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| SerializeError::InvalidUtf8(offset))
    }

    fn read_value_at(&mut self, depth: usize) -> SerializeResult<Value<'js>> {
        if depth > self.max_depth {
            return Err(SerializeError::DepthExceeded(self.max_depth));
        }

        let mut offset = self.position;
        let mut byte = self.read_byte()?;
        while byte == tag::PADDING {
            offset = self.position;
            byte = self.read_byte()?;
        }

        let ctx = self.ctx.clone();
        let value = match byte {
            tag::UNDEFINED => Value::new_undefined(ctx),
            tag::NULL => Value::new_null(ctx),
            tag::TRUE => Value::new_bool(ctx, true),
            tag::FALSE => Value::new_bool(ctx, false),
            tag::INT32 => Value::new_int(ctx, self.read_zigzag()? as i32),
            tag::UINT32 => Value::new_number(ctx, self.read_varint()? as u32 as f64),
            tag::DOUBLE => Value::new_float(ctx, self.read_f64()?),
            tag::BIGINT => BigInt::from_i64(ctx, self.read_zigzag()?)?.into_value(),
            tag::UTF8_STRING => {
                let s = self.read_utf8()?;
                rquickjs::String::from_str(ctx, &s)?.into_value()
            }
            tag::BEGIN_OBJECT => self.read_object(depth)?,
            tag::BEGIN_DENSE_ARRAY => self.read_array(depth)?,
            tag::BEGIN_MAP => self.read_map(depth)?,
            tag::BEGIN_SET => self.read_set(depth)?,
            tag::DATE => {
                let millis = self.read_f64()?;
                let date = self.intrinsics.new_date(millis)?.into_value();
                self.objects.push(date.clone());
                date
            }
            tag::ARRAY_BUFFER => {
                let len = self.read_varint()? as usize;
                let bytes = self.read_exact(len)?;
                let buffer = ArrayBuffer::new_copy(ctx, bytes)?.into_value();
                self.objects.push(buffer.clone());
                buffer
            }
            tag::OBJECT_REFERENCE => {
                let id = self.read_varint()? as u32;
                self.objects
                    .get(id as usize)
                    .cloned()
                    .ok_or(SerializeError::InvalidReference(id))?
            }
            other => return Err(SerializeError::InvalidTag { tag: other, offset }),
        };
        Ok(value)
    }

    fn read_object(&mut self, depth: usize) -> SerializeResult<Value<'js>> {
        let object = Object::new(self.ctx.clone())?;
        self.objects.push(object.clone().into_value());
        loop {
            if self.peek_byte()? == tag::END_OBJECT {
                self.position += 1;
                self.read_varint()?;
                break;
            }
            let key = self.read_value_at(depth + 1)?;
            let key = property_key(self.intrinsics, &key)?;
            let value = self.read_value_at(depth + 1)?;
            object.set(key.as_str(), value)?;
        }
        Ok(object.into_value())
    }

    fn read_array(&mut self, depth: usize) -> SerializeResult<Value<'js>> {
        let len = self.read_varint()? as usize;
        let array = Array::new(self.ctx.clone())?;
        self.objects.push(array.clone().into_value());
        for i in 0..len {
            let item = self.read_value_at(depth + 1)?;
            array.set(i, item)?;
        }
        let offset = self.position;
        match self.read_byte()? {
            tag::END_DENSE_ARRAY => {
                self.read_varint()?;
                self.read_varint()?;
            }
            other => return Err(SerializeError::InvalidTag { tag: other, offset }),
        }
        Ok(array.into_value())
    }

    fn read_map(&mut self, depth: usize) -> SerializeResult<Value<'js>> {
        let map = self.intrinsics.new_map()?;
        self.objects.push(map.clone().into_value());
        loop {
            if self.peek_byte()? == tag::END_MAP {
                self.position += 1;
                self.read_varint()?;
                break;
            }
            let key = self.read_value_at(depth + 1)?;
            let value = self.read_value_at(depth + 1)?;
            self.intrinsics.map_set(&map, key, value)?;
        }
        Ok(map.into_value())
    }

    fn read_set(&mut self, depth: usize) -> SerializeResult<Value<'js>> {
        let set = self.intrinsics.new_set()?;
        self.objects.push(set.clone().into_value());
        loop {
            if self.peek_byte()? == tag::END_SET {
                self.position += 1;
                self.read_varint()?;
                break;
            }
            let value = self.read_value_at(depth + 1)?;
            self.intrinsics.set_add(&set, value)?;
        }
        Ok(set.into_value())
    }
}

fn property_key<'js>(intrinsics: &Intrinsics<'js>, key: &Value<'js>) -> SerializeResult<String> {
    if let Some(s) = key.as_string() {
        return Ok(s.to_string()?);
    }
    Ok(intrinsics.stringify(key)?)
}

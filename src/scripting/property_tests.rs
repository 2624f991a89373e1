//! 值桥接属性测试
//!
//! 使用proptest验证转换与原始值编解码的往返性质

#[cfg(test)]
mod tests {
    use crate::config::BridgeConfig;
    use crate::mvalue::{MValue, MValueDict, Rgba};
    use crate::scripting::embedding::ResourceBindings;
    use crate::scripting::raw::{is_raw_value, RAW_HEADER_LEN, RAW_MAGIC};
    use crate::scripting::Bridge;
    use glam::{Vec2, Vec3};
    use proptest::prelude::*;
    use rquickjs::{Context, Ctx, Runtime};
    use std::rc::Rc;

    fn with_bridge<R>(f: impl FnOnce(&Bridge, Ctx<'_>) -> R) -> R {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let bridge = Bridge::new(&context, Rc::new(ResourceBindings::new()), BridgeConfig::default());
        context.with(|ctx| {
            ResourceBindings::install(&ctx).unwrap();
            f(&bridge, ctx)
        })
    }

    fn finite_f32() -> impl Strategy<Value = f32> {
        (-1.0e6f32..1.0e6).prop_filter("must be finite", |x| x.is_finite())
    }

    fn fractional_f64() -> impl Strategy<Value = f64> {
        any::<f64>().prop_filter("finite and non-integral", |x| x.is_finite() && x.fract() != 0.0)
    }

    // 键以 k 开头，避免组合出 x/y/z 或 r/g/b/a 的专用形状
    fn dict_key() -> impl Strategy<Value = String> {
        "k[a-z]{0,3}"
    }

    fn mvalue_tree() -> impl Strategy<Value = MValue> {
        let leaf = prop_oneof![
            Just(MValue::Nil),
            any::<bool>().prop_map(MValue::Bool),
            any::<i32>().prop_map(|i| MValue::Int(i as i64)),
            fractional_f64().prop_map(MValue::Double),
            "\\PC{0,8}".prop_map(MValue::String),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(MValue::List),
                prop::collection::btree_map(dict_key(), inner, 0..6)
                    .prop_map(|d: MValueDict| MValue::Dict(d)),
            ]
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn int64_roundtrip(v in any::<i64>()) {
            let back = with_bridge(|bridge, ctx| {
                let value = bridge.to_engine(&ctx, &MValue::Int(v));
                bridge.to_generic(&ctx, &value, false)
            });
            prop_assert_eq!(back, MValue::Int(v));
        }

        #[test]
        fn uint32_roundtrip_keeps_value(v in any::<u32>()) {
            let back = with_bridge(|bridge, ctx| {
                let value = bridge.to_engine(&ctx, &MValue::UInt(v as u64));
                bridge.to_generic(&ctx, &value, false)
            });
            // 在 int32 范围内的值按 int32 优先分类
            let expected = if v <= i32::MAX as u32 {
                MValue::Int(v as i64)
            } else {
                MValue::UInt(v as u64)
            };
            prop_assert_eq!(back, expected);
        }

        #[test]
        fn double_and_string_roundtrip(d in fractional_f64(), s in "\\PC{0,16}") {
            let (d_back, s_back) = with_bridge(|bridge, ctx| {
                let dv = bridge.to_engine(&ctx, &MValue::Double(d));
                let sv = bridge.to_engine(&ctx, &MValue::String(s.clone()));
                (bridge.to_generic(&ctx, &dv, false), bridge.to_generic(&ctx, &sv, false))
            });
            prop_assert_eq!(d_back, MValue::Double(d));
            prop_assert_eq!(s_back, MValue::String(s));
        }

        #[test]
        fn tree_roundtrip(tree in mvalue_tree()) {
            let (direct, via_raw) = with_bridge(|bridge, ctx| {
                let value = bridge.to_engine(&ctx, &tree);
                let direct = bridge.to_generic(&ctx, &value, false);
                let raw = bridge.to_raw_bytes(&ctx, &value);
                let decoded = bridge.to_engine(&ctx, &raw);
                (direct, bridge.to_generic(&ctx, &decoded, false))
            });
            prop_assert_eq!(&direct, &tree);
            prop_assert_eq!(&via_raw, &tree);
        }

        #[test]
        fn vector3_raw_roundtrip(x in finite_f32(), y in finite_f32(), z in finite_f32()) {
            let (bytes, back) = with_bridge(|bridge, ctx| {
                let value = bridge.to_engine(&ctx, &MValue::Vector3(Vec3::new(x, y, z)));
                let bytes = bridge.encode_raw(&ctx, &value).unwrap();
                let decoded = bridge.from_raw_bytes(&ctx, &bytes).unwrap();
                (bytes, bridge.to_generic(&ctx, &decoded, false))
            });
            prop_assert_eq!(&bytes[RAW_HEADER_LEN..RAW_HEADER_LEN + 4], &x.to_le_bytes()[..]);
            prop_assert_eq!(&bytes[RAW_HEADER_LEN + 8..], &z.to_le_bytes()[..]);
            prop_assert_eq!(back, MValue::Vector3(Vec3::new(x, y, z)));
        }

        #[test]
        fn vector2_and_rgba_raw_roundtrip(
            x in finite_f32(),
            y in finite_f32(),
            channels in any::<[u8; 4]>()
        ) {
            let color = Rgba::new(channels[0], channels[1], channels[2], channels[3]);
            let (v_back, c_back) = with_bridge(|bridge, ctx| {
                let v = bridge.to_engine(&ctx, &MValue::Vector2(Vec2::new(x, y)));
                let c = bridge.to_engine(&ctx, &MValue::Rgba(color));
                let v = bridge.to_engine(&ctx, &bridge.to_raw_bytes(&ctx, &v));
                let c = bridge.to_engine(&ctx, &bridge.to_raw_bytes(&ctx, &c));
                (bridge.to_generic(&ctx, &v, false), bridge.to_generic(&ctx, &c, false))
            });
            prop_assert_eq!(v_back, MValue::Vector2(Vec2::new(x, y)));
            prop_assert_eq!(c_back, MValue::Rgba(color));
        }

        #[test]
        fn buffers_without_magic_are_rejected(bytes in prop::collection::vec(any::<u8>(), 0..32)) {
            prop_assume!(!is_raw_value(&bytes));
            let decoded = with_bridge(|bridge, ctx| bridge.from_raw_bytes(&ctx, &bytes).is_some());
            prop_assert!(!decoded);
        }

        #[test]
        fn truncated_payloads_are_rejected(cut in RAW_MAGIC.len()..RAW_HEADER_LEN + 12) {
            let decoded = with_bridge(|bridge, ctx| {
                let value = bridge.to_engine(&ctx, &MValue::Vector3(Vec3::new(1.0, 2.0, 3.0)));
                let bytes = bridge.encode_raw(&ctx, &value).unwrap();
                bridge.from_raw_bytes(&ctx, &bytes[..cut]).is_some()
            });
            prop_assert!(!decoded);
        }
    }
}

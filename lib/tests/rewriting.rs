mod harness;

use classpatch::jvm::class_file::{ClassFile, Version};
use classpatch::jvm::code::{BranchInstruction, CodeItem, Instruction, InvokeType, VerificationType};
use classpatch::jvm::{BinaryName, ClassAccessFlags, FieldType, MethodAccessFlags};
use classpatch::patch::{
    CallTarget, ClassFileTransformer, ClassPatch, FieldPatch, InMemoryCatalog, Instrumenter,
    KnownSupertypes, LoaderId, MethodForward, MethodPatch, MethodRef, RuleCatalog, Settings,
};
use harness::*;
use std::borrow::Cow;

const LOADER: Option<LoaderId> = Some(LoaderId(7));

fn instrumenter(
    settings: Settings,
    catalog: InMemoryCatalog,
) -> Instrumenter<InMemoryCatalog, KnownSupertypes> {
    Instrumenter::new(settings, catalog, KnownSupertypes::new())
}

fn transformed(
    transformer: &impl ClassFileTransformer,
    class_name: &str,
    bytes: &[u8],
) -> ClassFile {
    match transformer.transform(LOADER, class_name, bytes).unwrap() {
        Cow::Owned(bytes) => ClassFile::parse(&bytes).unwrap(),
        Cow::Borrowed(_) => panic!("{} was left unchanged", class_name),
    }
}

fn is_unchanged(
    transformer: &impl ClassFileTransformer,
    loader: Option<LoaderId>,
    class_name: &str,
    bytes: &[u8],
) -> bool {
    match transformer.transform(loader, class_name, bytes).unwrap() {
        Cow::Borrowed(returned) => returned.as_ptr() == bytes.as_ptr(),
        Cow::Owned(_) => false,
    }
}

fn hook(method: &str) -> CallTarget {
    CallTarget::new(BinaryName::name("me/Hooks"), method)
}

#[test]
fn classes_without_rules_are_not_parsed() {
    let transformer = instrumenter(Settings::default(), InMemoryCatalog::default());
    let garbage = b"definitely not a class file".to_vec();
    assert!(is_unchanged(&transformer, LOADER, "me/Garbage", &garbage));

    let bytes = ClassBuilder::new("me/Plain", "java/lang/Object").build();
    assert!(is_unchanged(&transformer, LOADER, "me/Plain", &bytes));
}

#[test]
fn global_modes_skip_classes_that_do_not_qualify() {
    let settings = Settings {
        instrument_all_hash_codes: true,
        instrument_all_entity_applies: true,
        ..Settings::default()
    };
    let transformer = instrumenter(settings, InMemoryCatalog::default());

    let subclass = ClassBuilder::new("me/Derived", "me/Base").build();
    assert!(is_unchanged(&transformer, LOADER, "me/Derived", &subclass));

    let plain = ClassBuilder::new("me/Plain", "java/lang/Object").build();
    assert!(is_unchanged(&transformer, None, "me/Plain", &plain));

    let excluded = ClassBuilder::new("sun/misc/Thing", "java/lang/Object").build();
    assert!(is_unchanged(&transformer, LOADER, "sun/misc/Thing", &excluded));

    let interface = ClassBuilder::new("me/Shape", "java/lang/Object")
        .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT)
        .abstract_method("area", "()D")
        .build();
    assert!(is_unchanged(&transformer, LOADER, "me/Shape", &interface));

    let existing = ClassBuilder::new("me/Hashed", "java/lang/Object")
        .method(MethodAccessFlags::PUBLIC, "hashCode", "()I", |emitter| {
            emitter.const_int(42)?;
            emitter.return_(Some(&FieldType::int()));
            Ok(())
        })
        .build();
    assert!(is_unchanged(&transformer, LOADER, "me/Hashed", &existing));
}

#[test]
fn rules_without_injections_leave_class_alone() {
    let bytes = ClassBuilder::new("me/Sample", "java/lang/Object")
        .method(MethodAccessFlags::PUBLIC, "size", "()I", |emitter| {
            emitter.const_int(3)?;
            emitter.return_(Some(&FieldType::int()));
            Ok(())
        })
        .build();
    assert_eq!(ClassFile::parse(&bytes).unwrap().to_bytes().unwrap(), bytes);

    let catalog = InMemoryCatalog::default();
    catalog.add_method_patch(MethodPatch::new(MethodRef::new(
        BinaryName::name("me/Sample"),
        "size",
        Some("()I"),
    )));
    let transformer = instrumenter(Settings::default(), catalog);
    assert!(is_unchanged(&transformer, LOADER, "me/Sample", &bytes));
}

#[test]
fn cache_in_field_returns_cached_value_then_fills_it() {
    let bytes = ClassBuilder::new("me/Trade", "java/lang/Object")
        .method(MethodAccessFlags::PUBLIC, "total", "(J)J", |emitter| {
            emitter.get_local(1, &FieldType::long());
            emitter.return_(Some(&FieldType::long()));
            Ok(())
        })
        .build();

    let field = FieldPatch::new("__total").with_descriptor("J");
    let mut patch = MethodPatch::new(MethodRef::new(BinaryName::name("me/Trade"), "total", None));
    patch.cache_in_field = Some(field.clone());
    let mut class_patch = ClassPatch::default();
    class_patch.add_method_patch(patch);
    class_patch.add_field_patch(field);
    let catalog = InMemoryCatalog::default();
    catalog.insert("me/Trade", class_patch);

    let transformer = instrumenter(Settings::default(), catalog);
    let mut class = transformed(&transformer, "me/Trade", &bytes);
    assert_eq!(field_names(&class), vec!["__total"]);

    let body = body(&mut class, "total");
    assert_eq!(
        listing(&class, &body),
        vec![
            "ALoad(0)",
            "getfield me/Trade.__total:J",
            "LConst0",
            "LCmp",
            "If(EQ, ())",
            "ALoad(0)",
            "getfield me/Trade.__total:J",
            "LReturn",
            "LLoad(1)",
            "Dup2",
            "ALoad(0)",
            "DupX2",
            "Pop",
            "putfield me/Trade.__total:J",
            "LReturn",
        ]
    );
    assert!(body.exception_table.is_empty());
    assert_eq!(frame_count(&body), 1);
    assert!(body.max_stack >= 6);
    assert_eq!(body.max_locals, 3);
}

#[test]
fn cached_applies_short_circuit_on_hit() {
    let settings = Settings {
        instrument_all_entity_applies: true,
        ..Settings::default()
    };
    let bytes = ClassBuilder::new("me/Trade$", "java/lang/Object")
        .interface("optimus/platform/storable/EntityCompanionBase")
        .method(MethodAccessFlags::PUBLIC, "apply", "(I)Lme/Trade;", |emitter| {
            emitter.const_null();
            emitter.return_(Some(&FieldType::object(BinaryName::name("me/Trade"))));
            Ok(())
        })
        .build();

    let transformer = instrumenter(settings, InMemoryCatalog::default());
    let mut class = transformed(&transformer, "me/Trade$", &bytes);
    let body = body(&mut class, "apply");

    let lookup = "invokestatic optimus/debug/InstrumentedCallouts.getCachedValue\
                  (ILjava/lang/Object;[Ljava/lang/Object;)Loptimus/debug/CachedValue;";
    let store = "invokestatic optimus/debug/InstrumentedCallouts.setCachedValue\
                 (Ljava/lang/Object;Loptimus/debug/CachedValue;)V";
    assert_eq!(
        listing(&class, &body),
        vec![
            // Lookup, with the correlation ID, receiver, and boxed arguments
            "IConst1",
            "ALoad(0)",
            "IConst1",
            "anewarray java/lang/Object",
            "Dup",
            "IConst0",
            "ILoad(1)",
            "invokestatic java/lang/Integer.valueOf(I)Ljava/lang/Integer;",
            "AAStore",
            lookup,
            "AStore(2)",
            // Early return on a hit
            "ALoad(2)",
            "getfield optimus/debug/CachedValue.hasResult:Z",
            "If(EQ, ())",
            "ALoad(2)",
            "getfield optimus/debug/CachedValue.result:Ljava/lang/Object;",
            "checkcast me/Trade",
            "AReturn",
            // Original body, with the store before the return
            "AConstNull",
            "Dup",
            "ALoad(2)",
            store,
            "AReturn",
            // Exceptional exit
            "Dup",
            "ALoad(2)",
            store,
            "AThrow",
        ]
    );
    assert_eq!(body.max_locals, 3);
    assert_eq!(body.exception_table.len(), 1);
    assert_eq!(body.exception_table[0].catch_type, None);
    assert_eq!(frame_count(&body), 2);

    let local_names: Vec<_> = body
        .local_variables
        .iter()
        .map(|local| class.constants.utf8(local.name).unwrap())
        .collect();
    assert_eq!(local_names, vec!["__locValue"]);
}

#[test]
fn exceptional_exits_run_suffix_then_rethrow() {
    let bytes = ClassBuilder::new("me/Task", "java/lang/Object")
        .method(
            MethodAccessFlags::PUBLIC,
            "run",
            "(Ljava/lang/Object;)V",
            |emitter| {
                emitter.get_local(1, &FieldType::OBJECT);
                emitter.check_cast("java/lang/String")?;
                emitter.pop();
                emitter.return_(None);
                Ok(())
            },
        )
        .build();

    let mut patch = MethodPatch::new(MethodRef::new(BinaryName::name("me/Task"), "run", None));
    patch.suffix = Some(hook("exit"));
    patch.suffix_with_id = true;
    patch.suffix_with_this = true;
    let catalog = InMemoryCatalog::default();
    catalog.add_method_patch(patch);

    let transformer = instrumenter(Settings::default(), catalog);
    let mut class = transformed(&transformer, "me/Task", &bytes);
    let body = body(&mut class, "run");
    let exit = "invokestatic me/Hooks.exit(ILjava/lang/Object;)V";
    assert_eq!(
        listing(&class, &body),
        vec![
            "ALoad(1)",
            "checkcast java/lang/String",
            "Pop",
            "IConst1",
            "ALoad(0)",
            exit,
            "Return",
            "IConst1",
            "ALoad(0)",
            exit,
            "AThrow",
        ]
    );

    assert_eq!(body.exception_table.len(), 1);
    let handler = body.exception_table[0].handler;
    assert_eq!(body.exception_table[0].catch_type, None);

    // Handler frame only keeps the receiver, with the exception on the stack
    let handler_idx = body
        .items
        .iter()
        .position(|item| *item == CodeItem::Label(handler))
        .unwrap();
    let frame = body.items[handler_idx..]
        .iter()
        .find_map(|item| match item {
            CodeItem::Frame(frame) => Some(frame.clone()),
            _ => None,
        })
        .unwrap();
    let stack: Vec<_> = frame.stack.iter().map(|(_, _, vtype)| *vtype).collect();
    match stack.as_slice() {
        [VerificationType::Object(class_idx)] => {
            assert_eq!(class.constants.class_name(*class_idx).unwrap(), "java/lang/Throwable")
        }
        other => panic!("unexpected handler stack {:?}", other),
    }
    assert_eq!(frame.locals.len(), 1);
}

#[test]
fn old_class_files_get_no_frames() {
    let bytes = ClassBuilder::new("me/Task", "java/lang/Object")
        .version(Version::JAVA5)
        .method(MethodAccessFlags::PUBLIC, "run", "()V", |emitter| {
            emitter.const_int(1)?;
            emitter.pop();
            emitter.return_(None);
            Ok(())
        })
        .build();

    let mut patch = MethodPatch::new(MethodRef::new(BinaryName::name("me/Task"), "run", None));
    patch.suffix = Some(hook("exit"));
    let catalog = InMemoryCatalog::default();
    catalog.add_method_patch(patch);

    let transformer = instrumenter(Settings::default(), catalog);
    let mut class = transformed(&transformer, "me/Task", &bytes);
    assert_eq!(class.version, Version::JAVA5);
    let code = code(&class, "run");
    let attribute_names: Vec<_> = code
        .attributes
        .iter()
        .map(|attribute| class.constants.utf8(attribute.name_index).unwrap())
        .collect();
    assert!(!attribute_names.contains(&"StackMapTable"));

    let body = body(&mut class, "run");
    assert_eq!(frame_count(&body), 0);
    assert_eq!(body.exception_table.len(), 1);
}

#[test]
fn hash_code_forward_is_added_once() {
    let settings = Settings {
        instrument_all_hash_codes: true,
        ..Settings::default()
    };
    let bytes = ClassBuilder::new("me/Plain", "java/lang/Object")
        .method(MethodAccessFlags::PUBLIC, "name", "()Ljava/lang/String;", |emitter| {
            emitter.const_null();
            emitter.return_(Some(&FieldType::object(BinaryName::STRING)));
            Ok(())
        })
        .build();

    let transformer = instrumenter(settings, InMemoryCatalog::default());
    let first = match transformer.transform(LOADER, "me/Plain", &bytes).unwrap() {
        Cow::Owned(first) => first,
        Cow::Borrowed(_) => panic!("hashCode was not forwarded"),
    };
    let mut class = ClassFile::parse(&first).unwrap();
    assert_eq!(method_names(&class), vec!["name", "hashCode"]);

    let body = body(&mut class, "hashCode");
    assert_eq!(
        listing(&class, &body),
        vec![
            "ALoad(0)",
            "invokestatic optimus/debug/InstrumentedHashCodes.hashCode(Ljava/lang/Object;)I",
            "IReturn",
        ]
    );

    // The forward is now there, so a second pass finds nothing to do
    assert!(is_unchanged(&transformer, LOADER, "me/Plain", &first));
}

#[test]
fn entity_constructors_mark_scenario_stack() {
    let settings = Settings {
        instrument_all_entities: true,
        ..Settings::default()
    };
    let entity = "optimus/platform/storable/Entity";
    let bytes = ClassBuilder::new("me/Trade", entity)
        .method_items(MethodAccessFlags::PUBLIC, "<init>", "()V", |constants, code| {
            let super_init = constants.get_method_ref(entity, "<init>", "()V", false)?;
            code.items = vec![
                CodeItem::Instruction(Instruction::ALoad(0)),
                CodeItem::Instruction(Instruction::Invoke(InvokeType::Special, super_init)),
                CodeItem::Branch(BranchInstruction::Return),
            ];
            code.max_stack = 1;
            Ok(())
        })
        .build();

    let catalog = InMemoryCatalog::default();
    let classifier: KnownSupertypes = vec![entity].into_iter().collect();
    let transformer = Instrumenter::new(settings, catalog, classifier);
    let mut class = transformed(&transformer, "me/Trade", &bytes);
    let body = body(&mut class, "<init>");
    assert_eq!(
        listing(&class, &body),
        vec![
            "invokestatic optimus/debug/InstrumentedCallouts.markScenarioStackAsInitializing\
             ()Ljava/lang/Object;",
            "AStore(1)",
            "ALoad(0)",
            "invokespecial optimus/platform/storable/Entity.<init>()V",
            "ALoad(1)",
            "invokestatic optimus/debug/InstrumentedCallouts.resetScenarioStackInitializing\
             (Ljava/lang/Object;)V",
            "Return",
        ]
    );
    assert!(body.exception_table.is_empty());

    // The registration sticks around for later loads
    let registered = transformer.catalog().for_class("me/Trade").unwrap();
    assert_eq!(registered.method_patches.len(), 1);
}

#[test]
fn module_lazy_vals_are_bracketed() {
    let settings = Settings {
        instrument_all_module_constructors: true,
        ..Settings::default()
    };
    let module = |name: &str| {
        ClassBuilder::new(name, "java/lang/Object")
            .method(
                MethodAccessFlags::PUBLIC,
                "value$lzycompute",
                "()Ljava/lang/Object;",
                |emitter| {
                    emitter.const_null();
                    emitter.return_(Some(&FieldType::OBJECT));
                    Ok(())
                },
            )
            .build()
    };

    let catalog = InMemoryCatalog::default();
    catalog.exclude_module("me/Skipped$");
    let transformer = instrumenter(settings, catalog);

    let bytes = module("me/Config$");
    let mut class = transformed(&transformer, "me/Config$", &bytes);
    let body = body(&mut class, "value$lzycompute");
    let listing = listing(&class, &body);
    assert_eq!(
        &listing[..6],
        &[
            "IConst1",
            "ALoad(0)",
            "IConst0",
            "anewarray java/lang/Object",
            "invokestatic optimus/debug/InstrumentedCallouts.enterReentrantLazyCompute\
             (ILjava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;",
            "AStore(1)",
        ]
    );
    assert!(listing.contains(
        &"invokestatic optimus/debug/InstrumentedCallouts.exitReentrantLazyCompute\
          (Ljava/lang/Object;I)V"
            .to_owned()
    ));

    let skipped = module("me/Skipped$");
    assert!(is_unchanged(&transformer, LOADER, "me/Skipped$", &skipped));
    let runtime = module("scala/Predef$");
    assert!(is_unchanged(&transformer, LOADER, "scala/Predef$", &runtime));
    assert!(is_unchanged(&transformer, None, "me/Config$", &bytes));
}

#[test]
fn traced_getters_report_their_value() {
    let bytes = ClassBuilder::new("me/Trade", "java/lang/Object")
        .method(MethodAccessFlags::PUBLIC, "quantity", "()I", |emitter| {
            emitter.const_int(100)?;
            emitter.return_(Some(&FieldType::int()));
            Ok(())
        })
        .method(MethodAccessFlags::PUBLIC, "update", "(I)V", |emitter| {
            emitter.return_(None);
            Ok(())
        })
        .build();

    let catalog = InMemoryCatalog::default();
    catalog.update("me/Trade", |class_patch| class_patch.trace_vals_as_nodes = true);
    let transformer = instrumenter(Settings::default(), catalog);
    let mut class = transformed(&transformer, "me/Trade", &bytes);

    let quantity = body(&mut class, "quantity");
    let trace = "invokestatic optimus/debug/InstrumentedCallouts.traceValAsNode\
                 (Ljava/lang/Object;ILjava/lang/Object;)V";
    assert_eq!(
        listing(&class, &quantity)[..7].to_vec(),
        vec![
            "BiPush(100)",
            "Dup",
            "invokestatic java/lang/Integer.valueOf(I)Ljava/lang/Integer;",
            "IConst1",
            "ALoad(0)",
            trace,
            "IReturn",
        ]
    );

    let update = body(&mut class, "update");
    assert_eq!(listing(&class, &update), vec!["Return"]);
}

#[test]
fn correlation_ids_are_stable_across_classes() {
    let catalog = InMemoryCatalog::default();
    let first = MethodRef::new(BinaryName::name("me/A"), "run", Some("()V"));
    let second = MethodRef::new(BinaryName::name("me/B"), "run", Some("()V"));
    assert_eq!(catalog.allocate_id(&first), 1);
    assert_eq!(catalog.allocate_id(&second), 2);
    assert_eq!(catalog.allocate_id(&first), 1);
}

#[test]
fn explicit_forwards_cast_generic_results() {
    let bytes = ClassBuilder::new("me/Pricing", "java/lang/Object").build();

    let catalog = InMemoryCatalog::default();
    catalog.set_method_forward(MethodForward::new(
        MethodRef::new(
            BinaryName::name("me/Pricing"),
            "price",
            Some("(ID)Ljava/lang/String;"),
        ),
        CallTarget::new(BinaryName::name("me/Impl"), "price")
            .with_descriptor("(Ljava/lang/Object;ID)Ljava/lang/Object;"),
    ));
    let transformer = instrumenter(Settings::default(), catalog);
    let mut class = transformed(&transformer, "me/Pricing", &bytes);
    assert_eq!(method_names(&class), vec!["price"]);

    let body = body(&mut class, "price");
    assert_eq!(
        listing(&class, &body),
        vec![
            "ALoad(0)",
            "ILoad(1)",
            "DLoad(2)",
            "invokestatic me/Impl.price(Ljava/lang/Object;ID)Ljava/lang/Object;",
            "checkcast java/lang/String",
            "AReturn",
        ]
    );
    assert_eq!(body.max_stack, 4);
    assert_eq!(body.max_locals, 4);
}

#[test]
fn narrow_results_cached_in_int_fields_are_not_cast() {
    let bytes = ClassBuilder::new("me/Sample", "java/lang/Object")
        .method(MethodAccessFlags::PUBLIC, "flag", "()Z", |emitter| {
            emitter.const_int(1)?;
            emitter.return_(Some(&FieldType::boolean()));
            Ok(())
        })
        .build();

    let field = FieldPatch::new("__flag").with_descriptor("I");
    let mut patch = MethodPatch::new(MethodRef::new(BinaryName::name("me/Sample"), "flag", None));
    patch.cache_in_field = Some(field.clone());
    let catalog = InMemoryCatalog::default();
    catalog.add_method_patch(patch);
    catalog.add_field_patch("me/Sample", field);

    let transformer = instrumenter(Settings::default(), catalog);
    let mut class = transformed(&transformer, "me/Sample", &bytes);
    let body = body(&mut class, "flag");
    assert_eq!(
        listing(&class, &body),
        vec![
            "ALoad(0)",
            "getfield me/Sample.__flag:I",
            "If(EQ, ())",
            "ALoad(0)",
            "getfield me/Sample.__flag:I",
            "IReturn",
            "IConst1",
            "Dup",
            "ALoad(0)",
            "Swap",
            "putfield me/Sample.__flag:I",
            "IReturn",
        ]
    );
}

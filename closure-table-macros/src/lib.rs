use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, Type};

#[proc_macro_derive(ClosureTreeModel, attributes(closure_tree))]
pub fn derive_closure_tree_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_closure_tree_model(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    id_field: Option<String>,
    id_type: Option<Type>,
    parent_field: Option<String>,
    name_field: Option<String>,
    entity_name: Option<String>,
    hierarchy_name: Option<String>,
    hierarchy_table: Option<String>,
    ancestor_column: Option<String>,
    descendant_column: Option<String>,
    generations_column: Option<String>,
    order_column: Option<String>,
    dependent: Option<Dependent>,
}

enum Dependent {
    Nullify,
    Adopt,
    Destroy,
}

fn impl_closure_tree_model(input: &DeriveInput) -> syn::Result<TokenStream> {
    let struct_ident = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "ClosureTreeModel can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("closure_tree") {
            parse_closure_tree_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let id_field_name = options.id_field.unwrap_or_else(|| "id".to_string());
    let parent_field_name = options
        .parent_field
        .unwrap_or_else(|| "parent_id".to_string());
    let name_field_name = options.name_field.unwrap_or_else(|| "name".to_string());

    let id_field_ident = Ident::new(&id_field_name, struct_ident.span());
    let parent_field_ident = Ident::new(&parent_field_name, struct_ident.span());
    let name_field_ident = Ident::new(&name_field_name, struct_ident.span());

    let mut id_field_type: Option<Type> = options.id_type.clone();
    let mut seen_parent = false;
    let mut seen_name = false;

    if let Fields::Named(ref fields) = data_struct.fields {
        for field in &fields.named {
            if let Some(ident) = &field.ident {
                if ident == &id_field_ident && id_field_type.is_none() {
                    id_field_type = Some(field.ty.clone());
                }
                seen_parent |= ident == &parent_field_ident;
                seen_name |= ident == &name_field_ident;
            }
        }
    } else {
        return Err(syn::Error::new(
            data_struct.fields.span(),
            "ClosureTreeModel requires named fields",
        ));
    }

    if !seen_parent {
        return Err(syn::Error::new(
            struct_ident.span(),
            format!("missing parent field `{parent_field_name}`; set `parent_field = ...`"),
        ));
    }
    if !seen_name {
        return Err(syn::Error::new(
            struct_ident.span(),
            format!("missing name field `{name_field_name}`; set `name_field = ...`"),
        ));
    }

    let id_type = id_field_type.ok_or_else(|| {
        syn::Error::new(
            struct_ident.span(),
            "Unable to determine id field type; specify `id_type = ...` in #[closure_tree]",
        )
    })?;

    let entity_name = options
        .entity_name
        .unwrap_or_else(|| struct_ident.unraw().to_string());
    let hierarchy_name = options.hierarchy_name.unwrap_or_else(|| {
        if entity_name.ends_with("Hierarchy") {
            entity_name.clone()
        } else {
            format!("{}Hierarchy", entity_name)
        }
    });

    let base_table = table_name.unwrap_or_else(|| struct_ident.unraw().to_string());
    let hierarchy_table = options
        .hierarchy_table
        .unwrap_or_else(|| format!("{}_hierarchies", base_table));

    let id_column_variant = format_ident!("{}", to_pascal_case(&id_field_name));
    let parent_column_variant = format_ident!("{}", to_pascal_case(&parent_field_name));
    let name_column_variant = format_ident!("{}", to_pascal_case(&name_field_name));

    let span = struct_ident.span();
    let lit = |value: &str| syn::LitStr::new(value, span);

    let parent_column_literal = lit(&parent_field_name);
    let name_column_literal = lit(&name_field_name);
    let hierarchy_table_literal = lit(&hierarchy_table);
    let entity_name_literal = lit(&entity_name);
    let hierarchy_name_literal = lit(&hierarchy_name);

    let mut extra_options = Vec::new();
    if let Some(column) = options.ancestor_column {
        let column = lit(&column);
        extra_options.push(quote!(.ancestor_column(#column)));
    }
    if let Some(column) = options.descendant_column {
        let column = lit(&column);
        extra_options.push(quote!(.descendant_column(#column)));
    }
    if let Some(column) = options.generations_column {
        let column = lit(&column);
        extra_options.push(quote!(.generations_column(#column)));
    }
    if let Some(column) = options.order_column {
        let column = lit(&column);
        extra_options.push(quote!(.order_strategy(
            ::closure_table::OrderStrategy::numeric_column(#column)
        )));
    }
    if let Some(dependent) = options.dependent {
        let variant = match dependent {
            Dependent::Nullify => format_ident!("Nullify"),
            Dependent::Adopt => format_ident!("Adopt"),
            Dependent::Destroy => format_ident!("Destroy"),
        };
        extra_options.push(quote!(.dependent_behavior(
            ::closure_table::DependentBehavior::#variant
        )));
    }

    let generated = quote! {
        impl ::closure_table::ClosureTreeModel for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;
            type Id = #id_type;

            fn closure_tree_config() -> &'static ::closure_table::ClosureTreeConfig {
                static CONFIG: ::closure_table::__private::once_cell::sync::Lazy<
                    ::closure_table::ClosureTreeConfig,
                > = ::closure_table::__private::once_cell::sync::Lazy::new(|| {
                    let base = ::closure_table::ClosureTreeConfig::new(
                        #entity_name_literal,
                        #hierarchy_name_literal,
                    );
                    ::closure_table::ClosureTreeOptions::default()
                        .parent_column(#parent_column_literal)
                        .name_column(#name_column_literal)
                        .hierarchy_table(#hierarchy_table_literal)
                        #(#extra_options)*
                        .apply(base)
                });
                &CONFIG
            }

            fn id(&self) -> Self::Id {
                self.#id_field_ident.clone()
            }

            fn parent_id(&self) -> Option<Self::Id> {
                self.#parent_field_ident.clone()
            }

            fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>) {
                active.#parent_field_ident = ::sea_orm::ActiveValue::Set(parent);
            }

            fn name(&self) -> &str {
                self.#name_field_ident.as_str()
            }

            fn set_name(active: &mut Self::ActiveModel, name: &str) {
                active.#name_field_ident = ::sea_orm::ActiveValue::Set(name.to_owned());
            }

            fn parent_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#parent_column_variant
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column_variant
            }

            fn name_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#name_column_variant
            }
        }
    };

    Ok(generated.into())
}

fn parse_closure_tree_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        if ident == "id_type" {
            let ty: Type = meta.value()?.parse()?;
            options.id_type = Some(ty);
            return Ok(());
        }

        let value: syn::LitStr = meta.value()?.parse()?;
        let text = value.value();
        if text.trim().is_empty() {
            return Err(syn::Error::new(
                value.span(),
                format!("`{ident}` cannot be empty"),
            ));
        }

        let slot = match ident.as_str() {
            "id_field" => &mut options.id_field,
            "parent_field" => &mut options.parent_field,
            "name_field" => &mut options.name_field,
            "entity_name" => &mut options.entity_name,
            "hierarchy_name" => &mut options.hierarchy_name,
            "hierarchy_table" => &mut options.hierarchy_table,
            "ancestor_column" => &mut options.ancestor_column,
            "descendant_column" => &mut options.descendant_column,
            "generations_column" => &mut options.generations_column,
            "order_column" => &mut options.order_column,
            "dependent" => {
                options.dependent = Some(match text.as_str() {
                    "nullify" => Dependent::Nullify,
                    "adopt" => Dependent::Adopt,
                    "destroy" => Dependent::Destroy,
                    other => {
                        return Err(syn::Error::new(
                            value.span(),
                            format!(
                                "Unsupported dependent behavior `{other}`; \
                                 expected `nullify`, `adopt` or `destroy`"
                            ),
                        ))
                    }
                });
                return Ok(());
            }
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported closure_tree option `{other}`"),
                ));
            }
        };
        *slot = Some(text);

        Ok(())
    })
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: syn::LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            // Skip the value of any other `key = value` option.
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
